use core::{fmt, time::Duration};


/// version triplet reported to units
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}
impl Version {
    /// lowest version some older units accept without complaining
    pub const MINIMUM: Self = Self::new(2, 4, 0);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {major, minor, patch}
    }
    /// version as sent in answer to a unit, older versions are replaced by [Self::MINIMUM]
    pub fn reported(self) -> Self {
        if self < Self::MINIMUM {Self::MINIMUM}
        else {self}
    }
    /// 7 bit encoding of the three numbers
    pub fn to_data(self) -> [u8; 3] {
        [self.major & 0x7f, self.minor & 0x7f, self.patch & 0x7f]
    }
}
impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}


/// settings of a bus master
#[derive(Clone, Debug)]
pub struct Config {
    /// uart baud rate
    pub rate: u32,
    /// delay between scheduler iterations, skipped while discovery is in progress
    pub tick: Duration,
    /// how long a block may wait for room in the transmit queue
    pub send_timeout: Duration,
    /// silence inserted after each transmitted block
    pub pause: Duration,
    /// maximum delay between two characters of a bootloader
    pub char_timeout: Duration,
    /// maximum duration of a whole firmware update
    pub session_timeout: Duration,
    /// master version reported to units
    pub version: Version,
    /// maximum number of 64 byte chunks in a firmware image
    pub max_chunks: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            rate: 62_500,
            tick: Duration::from_millis(2),
            send_timeout: Duration::from_millis(20),
            pause: Duration::from_micros(100),
            char_timeout: Duration::from_secs(3),
            session_timeout: Duration::from_secs(120),
            version: Version::new(2, 6, 0),
            max_chunks: 16_384,
        }
    }
}
impl Config {
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
    pub fn with_char_timeout(mut self, timeout: Duration) -> Self {
        self.char_timeout = timeout;
        self
    }
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
    pub fn with_max_chunks(mut self, chunks: usize) -> Self {
        self.max_chunks = chunks;
        self
    }
}
