use heapless::String;

use crate::codes::{Format, OperatingMode, ModuleKind};


/// number of characters of a loco name
pub const NAME: usize = 12;

/// state of a loco as shown on units
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocoState {
    /// speed step 0..=127
    pub speed: u8,
    pub reverse: bool,
    pub emergency: bool,
    pub format: Format,
    /// F0 in bit 0 up to F27 in bit 27
    pub functions: u32,
    /// double traction partner
    pub consist: Option<u16>,
}

/// entry of the loco database
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocoEntry {
    pub loco: u16,
    pub format: Format,
    pub name: String<NAME>,
}

/**
    loco, turnout and configuration store the station acts on

    loco database indices are 1-based and follow the database sort order.

    configuration methods have defaults answering a failure, so a layout only implements what its hardware supports
*/
pub trait Layout {
    fn mode(&self) -> OperatingMode;
    /// change the track operating mode, visible at the next status broadcast
    fn set_mode(&mut self, mode: OperatingMode);

    /// acquire a loco for a unit, None if it cannot be controlled
    fn take_control(&mut self, loco: u16) -> Option<LocoState>;
    fn release(&mut self, _loco: u16) {}
    fn loco(&self, loco: u16) -> Option<LocoState>;
    fn set_speed(&mut self, loco: u16, speed: u8, reverse: bool, emergency: bool);
    /// set the 7 functions of a group, group 0 is F0-F6 up to group 3 for F21-F27
    fn set_functions(&mut self, loco: u16, group: u8, bits: u8);
    /// link two locos in double traction, false if refused
    fn couple(&mut self, first: u16, second: u16) -> bool;
    fn uncouple(&mut self, loco: u16) -> bool;

    fn set_turnout(&mut self, turnout: u16, thrown: bool, on: bool);
    /// 4 bits of turnout state to refresh in the given status round 0..8
    fn turnout_refresh(&self, _round: u8) -> u8 {0}

    fn loco_count(&self) -> u16;
    fn loco_entry(&self, index: u16) -> Option<LocoEntry>;
    fn remove_entry(&mut self, index: u16) -> bool;
    fn store_entry(&mut self, entry: LocoEntry);

    /// system flags, 14 bits
    fn flags(&self) -> u16 {0}
    fn set_flags(&mut self, _flags: u16) {}
    fn modules(&self, _kind: ModuleKind) -> u8 {0}
    fn set_modules(&mut self, _kind: ModuleKind, _count: u8) -> bool {false}
    /// booster voltage in decivolts
    fn voltage(&self) -> u16 {0}
    fn set_voltage(&mut self, _decivolts: u16) -> bool {false}
    /// booster current limit in milliamps
    fn current(&self) -> u16 {0}
    fn set_current(&mut self, _milliamps: u16) -> bool {false}

    /// read a CV on the programming track
    fn read_cv(&mut self, _cv: u16) -> Option<u8> {None}
    fn write_cv(&mut self, _cv: u16, _value: u8) -> bool {false}
    fn read_cv_bit(&mut self, _cv: u16, _bit: u8) -> Option<bool> {None}
    fn write_cv_bit(&mut self, _cv: u16, _bit: u8, _value: bool) -> bool {false}
    /// address of the decoder on the programming track
    fn read_address(&mut self) -> Option<u16> {None}
    /// write a CV on the main track
    fn pom_write(&mut self, _loco: u16, _cv: u16, _value: u8) -> bool {false}
    fn pom_write_bit(&mut self, _loco: u16, _cv: u16, _bit: u8, _value: bool) -> bool {false}
    fn mfx_assign(&mut self, _loco: u16) -> bool {false}
    /// default decoder format of new locos
    fn format(&self) -> Format {Format::default()}
    fn set_format(&mut self, _format: Format) -> bool {false}
}

/// notifications raised by the station
pub trait Events {
    fn connected(&mut self, _unit: u8, _serial: u32) {}
    fn disconnected(&mut self, _unit: u8, _serial: u32) {}
    /// speed or functions of a loco were changed from a unit
    fn loco_changed(&mut self, _loco: u16) {}
}
impl Events for () {}
