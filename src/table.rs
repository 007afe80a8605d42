/*!
    table of the units known on the bus, indexed by bus address

    a slot is live while its `alive` budget is positive. Every block received from a unit refills the budget, every keepalive poll of it spends one unit of budget.
*/

use crate::block::UNITS;


/// budget of a freshly heard unit, in poll rotations
pub const ALIVE: i16 = 210;
/// number of stale speed echoes discarded after another unit took over a loco
pub const BLOCKED: u8 = 2;


/// state kept about one unit
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    /// 24 bit serial number, 0 when vacant
    pub serial: u32,
    pub hw_rev: u8,
    pub sw_rev: u8,
    /// remaining poll rotations before the unit is considered gone
    pub alive: i16,
    /// loco address currently driven from this unit, 0 for none
    pub controlled_loco: u16,
    /// number of upcoming loco updates from this unit to discard
    pub blocked: u8,
    /// the address was given by discovery, rather than revived by traffic
    pub assigned: bool,
}
impl Slot {
    pub fn is_alive(&self) -> bool {
        self.alive > 0
    }
}

/// the 64 unit slots
#[derive(Clone, Debug)]
pub struct DeviceTable {
    slots: [Slot; UNITS],
}
impl DeviceTable {
    pub fn new() -> Self {
        Self {slots: [Slot::default(); UNITS]}
    }
    pub fn lookup(&self, unit: u8) -> &Slot {
        &self.slots[usize::from(unit) % UNITS]
    }
    fn slot_mut(&mut self, unit: u8) -> &mut Slot {
        &mut self.slots[usize::from(unit) % UNITS]
    }
    /// iterate over live slots with their index
    pub fn alive(&self) -> impl Iterator<Item=(u8, &Slot)> {
        self.slots.iter().enumerate()
            .filter(|(_, slot)| slot.is_alive())
            .map(|(unit, slot)| (unit as u8, slot))
    }
    /// refill the budget of a unit that has been heard
    pub fn touch(&mut self, unit: u8) {
        self.slot_mut(unit).alive = ALIVE;
    }
    /**
        spend one unit of budget of a polled unit

        returns true exactly once, when the budget runs out. The slot is then vacated and the caller must report the disconnection.
    */
    pub fn decay(&mut self, unit: u8) -> bool {
        let slot = self.slot_mut(unit);
        if !slot.is_alive()
            {return false}
        slot.alive -= 1;
        if slot.is_alive()
            {return false}
        *slot = Slot::default();
        true
    }
    /// first vacant slot, if any
    pub fn vacant(&self) -> Option<u8> {
        self.slots.iter()
            .position(|slot| !slot.is_alive())
            .map(|unit| unit as u8)
    }
    /// live slot of the unit with the given serial number
    pub fn find_serial(&self, serial: u32) -> Option<u8> {
        self.alive()
            .find(|(_, slot)| slot.serial == serial)
            .map(|(unit, _)| unit)
    }
    /// give a slot to a newly discovered unit
    pub fn assign(&mut self, unit: u8, serial: u32) {
        *self.slot_mut(unit) = Slot {
            serial,
            alive: ALIVE,
            assigned: true,
            .. Slot::default()
            };
    }
    /// record the revisions reported by a unit
    pub fn set_revisions(&mut self, unit: u8, hw_rev: u8, sw_rev: u8) {
        let slot = self.slot_mut(unit);
        slot.hw_rev = hw_rev;
        slot.sw_rev = sw_rev;
    }
    /// mark a unit as driving a loco
    pub fn take_control(&mut self, unit: u8, loco: u16) {
        self.slot_mut(unit).controlled_loco = loco;
    }
    /// forget the loco driven by a unit
    pub fn release(&mut self, unit: u8) {
        let slot = self.slot_mut(unit);
        slot.controlled_loco = 0;
        slot.blocked = 0;
    }
    /**
        after an authoritative change of `loco` from `except`, make every other unit driving the same loco discard its next [BLOCKED] updates

        this keeps stale echoes from a second controller from overriding the fresh value
    */
    pub fn block_others(&mut self, loco: u16, except: u8) {
        for (unit, slot) in self.slots.iter_mut().enumerate() {
            if unit != usize::from(except) && slot.is_alive() && slot.controlled_loco == loco {
                slot.blocked = BLOCKED;
            }
        }
    }
    /**
        consume one blocked update of a unit

        returns true if the update must be discarded
    */
    pub fn consume_blocked(&mut self, unit: u8) -> bool {
        let slot = self.slot_mut(unit);
        if slot.blocked == 0
            {return false}
        slot.blocked -= 1;
        true
    }
}
impl Default for DeviceTable {
    fn default() -> Self {Self::new()}
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_vacates_after_full_budget() {
        let mut table = DeviceTable::new();
        table.assign(5, 0x12_3456);
        table.touch(5);
        let mut reports = 0;
        for call in 1 ..= 300 {
            if table.decay(5) {
                reports += 1;
                assert_eq!(call, 210);
            }
        }
        assert_eq!(reports, 1);
        let slot = table.lookup(5);
        assert!(!slot.is_alive());
        assert!(!slot.assigned);
        assert_eq!(slot.serial, 0);
    }

    #[test]
    fn touch_refills() {
        let mut table = DeviceTable::new();
        table.touch(3);
        for _ in 0 .. 200 {
            assert!(!table.decay(3));
        }
        table.touch(3);
        assert_eq!(table.lookup(3).alive, ALIVE);
        assert!(!table.lookup(3).assigned);
    }

    #[test]
    fn vacant_and_serial_lookup() {
        let mut table = DeviceTable::new();
        assert_eq!(table.vacant(), Some(0));
        table.assign(0, 11);
        table.assign(1, 22);
        assert_eq!(table.vacant(), Some(2));
        assert_eq!(table.find_serial(22), Some(1));
        assert_eq!(table.find_serial(33), None);
        for unit in 0 .. UNITS as u8 {
            table.assign(unit, u32::from(unit) + 100);
        }
        assert_eq!(table.vacant(), None);
    }

    #[test]
    fn blocking_spares_the_author() {
        let mut table = DeviceTable::new();
        for unit in [1, 2, 3] {
            table.touch(unit);
        }
        table.take_control(1, 42);
        table.take_control(2, 42);
        table.take_control(3, 7);
        table.block_others(42, 1);
        assert_eq!(table.lookup(1).blocked, 0);
        assert_eq!(table.lookup(2).blocked, BLOCKED);
        assert_eq!(table.lookup(3).blocked, 0);

        assert!(table.consume_blocked(2));
        assert!(table.consume_blocked(2));
        assert!(!table.consume_blocked(2));
    }
}
