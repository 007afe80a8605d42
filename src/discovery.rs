/*!
    hotplug discovery: radix search of unaddressed units by serial number

    the 24 bit serial is split in 3+7+7+7 bits, one part per level. At each level the master broadcasts the known upper parts with a running counter for the current part, and any unaddressed unit whose serial starts that way echoes the probe. An echo descends one level, a counter running past its width ascends one level. At the last level the echo holds a full serial, which gets a bus address.
*/

use heapless::Deque;

use crate::block::DATA;


/// deepest level, where probes hold a complete serial
pub const LAST: u8 = 3;
/// number of recent probes an echo may still answer
pub const WINDOW: usize = 16;

/// width in bits of the serial part probed at each level
const WIDTHS: [u8; 4] = [3, 7, 7, 7];

/// number of counter values at a level
pub const fn span(level: u8) -> u8 {
    1 << WIDTHS[level as usize]
}


/// content of a discovery probe, and of the echo answering it
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Probe {
    pub level: u8,
    /// serial parts, only the first `level+1` are meaningful
    pub prefix: [u8; 4],
}
impl Probe {
    pub fn to_data(&self) -> [u8; DATA] {
        let mut data = [0; DATA];
        data[0] = self.level;
        for i in 0 ..= usize::from(self.level) {
            data[1 + i] = self.prefix[i];
        }
        data
    }
    /// decode probe content, rejecting levels and parts out of range
    pub fn from_data(data: &[u8; DATA]) -> Option<Self> {
        let level = data[0];
        if level > LAST
            {return None}
        let mut prefix = [0; 4];
        for i in 0 ..= level {
            let part = data[1 + usize::from(i)];
            if part >= span(i)
                {return None}
            prefix[usize::from(i)] = part;
        }
        Some(Self {level, prefix})
    }
    /// full serial number, meaningful at the last level
    pub fn serial(&self) -> u32 {
        serial_of(self.prefix)
    }
}

/// assemble a serial number from its 4 parts
pub fn serial_of(prefix: [u8; 4]) -> u32 {
    (u32::from(prefix[0] & 0x7) << 21)
        | (u32::from(prefix[1] & 0x7f) << 14)
        | (u32::from(prefix[2] & 0x7f) << 7)
        | u32::from(prefix[3] & 0x7f)
}
/// split a serial number into its 4 parts
pub fn parts_of(serial: u32) -> [u8; 4] {
    [
        ((serial >> 21) & 0x7) as u8,
        ((serial >> 14) & 0x7f) as u8,
        ((serial >> 7) & 0x7f) as u8,
        (serial & 0x7f) as u8,
    ]
}

/// outcome of an echo
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Match {
    /// not related to the current search
    Ignored,
    /// some unit shares the prefix, the search went one level deeper
    Descend,
    /// a unit answered with its complete serial
    Found(u32),
}

/// position of the discovery search
#[derive(Clone, Debug, Default)]
pub struct Discovery {
    level: u8,
    /// parts of the prefix above `level`, and the running counter at `level`
    prefix: [u8; 4],
    /// probes sent most recently, oldest first
    recent: Deque<Probe, WINDOW>,
}
impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn level(&self) -> u8 {self.level}
    pub fn prefix(&self) -> [u8; 4] {self.prefix}
    /// restart the search from the top level
    pub fn reset(&mut self) {
        *self = Self::default();
    }
    /// probe to broadcast at the current position
    pub fn current(&self) -> Probe {
        Probe {level: self.level, prefix: self.prefix}
    }
    /// emit the probe for the current position and move the counter on
    pub fn probe(&mut self) -> Probe {
        let probe = self.current();
        if self.recent.is_full() {
            self.recent.pop_front();
        }
        self.recent.push_back(probe).ok();
        self.advance();
        probe
    }
    /**
        move the counter of the current level, ascending as long as counters run past their width

        the top level counter wraps, so the search never ends
    */
    fn advance(&mut self) {
        loop {
            let level = usize::from(self.level);
            self.prefix[level] += 1;
            if self.prefix[level] < span(self.level)
                {break}
            self.prefix[level] = 0;
            if self.level == 0
                {break}
            self.level -= 1;
        }
    }
    /**
        process the echo of a probe

        an echo is accepted if it repeats one of the last [WINDOW] probes, or if it belongs to the current level under the current prefix. Echoes come back while later probes are still on the wire, the search may even have left the level by then.
    */
    pub fn echo(&mut self, echo: Probe) -> Match {
        let level = usize::from(echo.level);
        let related = self.recent.iter().any(|&probe| probe == echo)
            || (echo.level == self.level && echo.prefix[.. level] == self.prefix[.. level]);
        if !related
            {return Match::Ignored}
        if echo.level == LAST
            {return Match::Found(echo.serial())}

        self.level = echo.level + 1;
        self.prefix[.. level+1].copy_from_slice(&echo.prefix[.. level+1]);
        for part in &mut self.prefix[level+1 ..] {
            *part = 0;
        }
        // probes of the abandoned branch are answered again on the next pass
        self.recent.clear();
        Match::Descend
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_echo_reaches_last_level() {
        let mut discovery = Discovery::new();
        for step in 0 .. 3 {
            assert_eq!(discovery.level(), step);
            let probe = discovery.probe();
            assert_eq!(probe.level, step);
            assert_eq!(discovery.echo(probe), Match::Descend);
        }
        assert_eq!(discovery.level(), LAST);
        assert_eq!(discovery.prefix(), [0; 4]);
        let probe = discovery.probe();
        assert_eq!(discovery.echo(probe), Match::Found(0));
    }

    #[test]
    fn descends_along_the_echoed_serial() {
        let serial = 0x5a_b3c1 & 0xff_ffff;
        let parts = parts_of(serial);
        let mut discovery = Discovery::new();
        let mut found = None;
        // a single unit answering every probe matching its serial
        for _ in 0 .. 2_000 {
            let probe = discovery.probe();
            let level = usize::from(probe.level);
            if probe.prefix[..= level] == parts[..= level] {
                if let Match::Found(serial) = discovery.echo(probe) {
                    found = Some(serial);
                    break
                }
            }
        }
        assert_eq!(found, Some(serial));
        assert_eq!(serial_of(parts), serial);
    }

    #[test]
    fn never_echo_cycles_the_top_level() {
        let mut discovery = Discovery::new();
        discovery.level = 2;
        discovery.prefix = [5, 17, 120, 0];
        let mut tops = Vec::new();
        for _ in 0 .. 10_000 {
            let probe = discovery.probe();
            if probe.level == 0 {
                tops.push(probe.prefix[0]);
                if tops.len() == 16
                    {break}
            }
        }
        // ascending from level 2 finishes the pending subtrees of 17 then 5
        assert_eq!(tops[0], 6);
        let expected = (0 .. 16).map(|i| ((6 + i) % 8) as u8).collect::<Vec<_>>();
        assert_eq!(tops, expected);
        assert_eq!(discovery.level(), 0);
    }

    #[test]
    fn late_echo_after_ascent_is_accepted() {
        let mut discovery = Discovery::new();
        discovery.level = 1;
        discovery.prefix = [2, 127, 0, 0];
        let probe = discovery.probe();
        // counter ran out, the search is back at the top
        assert_eq!(discovery.level(), 0);
        assert_eq!(discovery.echo(probe), Match::Descend);
        assert_eq!(discovery.level(), 2);
        assert_eq!(discovery.prefix(), [2, 127, 0, 0]);
    }

    #[test]
    fn echo_in_window_descends_after_ascent() {
        let mut discovery = Discovery::new();
        discovery.level = 1;
        discovery.prefix = [2, 125, 0, 0];
        let first = discovery.probe();
        discovery.probe();
        discovery.probe();
        // level 1 ran out, the top level went on
        assert_eq!(discovery.level(), 0);
        assert_eq!(discovery.probe(), Probe {level: 0, prefix: [3, 0, 0, 0]});

        assert_eq!(discovery.echo(first), Match::Descend);
        assert_eq!(discovery.level(), 2);
        assert_eq!(discovery.prefix(), [2, 125, 0, 0]);
        assert_eq!(discovery.probe(), Probe {level: 2, prefix: [2, 125, 0, 0]});
    }

    #[test]
    fn echo_older_than_window_is_ignored() {
        let mut discovery = Discovery::new();
        discovery.level = 1;
        discovery.prefix = [2, 120, 0, 0];
        let first = discovery.probe();
        for _ in 0 .. WINDOW {
            discovery.probe();
        }
        assert_eq!(discovery.level(), 0);
        assert_eq!(discovery.echo(first), Match::Ignored);
        assert_eq!(discovery.level(), 0);
    }

    #[test]
    fn unrelated_echo_is_ignored() {
        let mut discovery = Discovery::new();
        discovery.probe();
        let stray = Probe {level: 2, prefix: [1, 1, 1, 0]};
        assert_eq!(discovery.echo(stray), Match::Ignored);
        assert_eq!(discovery.level(), 0);
    }

    #[test]
    fn probe_data() {
        let probe = Probe {level: 2, prefix: [7, 100, 3, 0]};
        assert_eq!(probe.to_data(), [2, 7, 100, 3, 0, 0]);
        assert_eq!(Probe::from_data(&probe.to_data()), Some(probe));
        assert_eq!(Probe::from_data(&[0, 9, 0, 0, 0, 0]), None);
        assert_eq!(Probe::from_data(&[4, 0, 0, 0, 0, 0]), None);
    }
}
