/*!
    EasyNet command and answer codes, and the packed layouts of data bytes shared by several messages

    code 0x00 is reserved and never sent. The same code may name a request from a unit and the master's answer to it.
*/

use bilge::prelude::*;


/// keepalive poll from the master, and its answer
pub const PING: u8 = 0x01;
/// master version request from a unit, and the version answer
pub const VERSION: u8 = 0x02;
/// operating mode request from a unit
pub const MODE: u8 = 0x03;
/// operating mode broadcast from the master
pub const STATUS: u8 = 0x03;

/// acquire a loco, answered by [LOCO_STATE]
pub const LOCO_TAKE: u8 = 0x10;
/// current speed, direction and first functions of a loco
pub const LOCO_STATE: u8 = 0x10;
pub const LOCO_RELEASE: u8 = 0x11;
pub const LOCO_SPEED: u8 = 0x12;
pub const LOCO_FUNC: u8 = 0x13;
/// functions F14 to F27 of a loco
pub const LOCO_FUNCTIONS: u8 = 0x14;
/// double traction partner of a loco
pub const LOCO_CONSIST: u8 = 0x15;
/// the requested loco cannot be controlled
pub const LOCO_UNAVAILABLE: u8 = 0x16;

pub const TRACTION_COUPLE: u8 = 0x18;
pub const TRACTION_CLEAR: u8 = 0x19;

pub const TURNOUT: u8 = 0x20;
/// broadcast acknowledge of an accessory command
pub const ACC_ACK: u8 = 0x21;

pub const DB_SELECT: u8 = 0x30;
pub const DB_NEXT: u8 = 0x31;
pub const DB_PREV: u8 = 0x32;
pub const DB_DELETE: u8 = 0x33;
/// first of the five name write messages, [DB_DATA0] + 4 is the last
pub const DB_DATA0: u8 = 0x34;
pub const DB_DATA4: u8 = 0x38;
pub const DB_ENTRY: u8 = 0x39;
pub const DB_NAME: u8 = 0x3a;
pub const DB_EMPTY: u8 = 0x3b;

/// discovery probe, echoed by matching units
pub const HP_PROBE: u8 = 0x40;
/// assign a bus address to the unit owning a serial number
pub const HP_SETUNITADR: u8 = 0x41;
/// request to restart discovery from the top level
pub const HP_RESTART: u8 = 0x42;
/// hardware and software revisions reported by a freshly addressed unit
pub const HP_UNITINFO: u8 = 0x43;

/// generic configuration, the first data byte is a sub opcode from [config]
pub const CONFIG: u8 = 0x50;

/// free text from a unit
pub const DEBUG: u8 = 0x70;


/// sub opcodes of [CONFIG]
pub mod config {
    pub const FLAGS_GET: u8 = 0x01;
    pub const FLAGS_SET: u8 = 0x02;
    pub const FLAGS_CLEAR: u8 = 0x03;
    pub const MODULES_GET: u8 = 0x04;
    pub const MODULES_SET: u8 = 0x05;
    pub const VOLTAGE_GET: u8 = 0x06;
    pub const VOLTAGE_SET: u8 = 0x07;
    pub const CURRENT_GET: u8 = 0x08;
    pub const CURRENT_SET: u8 = 0x09;
    pub const PT_READ_BYTE: u8 = 0x0a;
    pub const PT_WRITE_BYTE: u8 = 0x0b;
    pub const PT_READ_BIT: u8 = 0x0c;
    pub const PT_WRITE_BIT: u8 = 0x0d;
    pub const PT_READ_ADDRESS: u8 = 0x0e;
    pub const POM_WRITE_BYTE: u8 = 0x0f;
    pub const POM_WRITE_BIT: u8 = 0x10;
    pub const MFX_ASSIGN: u8 = 0x11;
    pub const FORMAT_GET: u8 = 0x12;
    pub const FORMAT_SET: u8 = 0x13;

    /// status byte of a successful operation
    pub const OK: u8 = 0;
    /// status byte of a failed or unsupported operation
    pub const FAILED: u8 = 1;
}


/// direction and decoder flags of a loco, sent along its speed
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Drive {
    pub reverse: bool,
    /// emergency stop requested for this loco
    pub emergency: bool,
    /// loco is part of a double traction
    pub consist: bool,
    /// decoder format, see [Format]
    pub format: u3,
    reserved: u2,
}

/// rotating turnout refresh carried by the status broadcast
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Refresh {
    /// broadcast round, wraps every 8 rounds
    pub round: u3,
    /// 4 bits of turnout state belonging to this round
    pub state: u4,
    reserved: bool,
}

/// third byte of a main track CV write, holding what does not fit the two 7 bit bytes
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct CvHigh {
    /// CV number bits 7 to 9
    pub cv: u3,
    reserved: u3,
    /// bit 7 of the written value
    pub msb: bool,
    padding: bool,
}

/// turnout command flags
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Accessory {
    pub thrown: bool,
    /// coil powered
    pub on: bool,
    reserved: u6,
}

crate::pack_bits!(Drive);
crate::pack_bits!(Refresh);
crate::pack_bits!(CvHigh);
crate::pack_bits!(Accessory);

/// decoder format of a loco
#[bitsize(3)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq)]
pub enum Format {
    Dcc14 = 0,
    Dcc28 = 1,
    Dcc126 = 2,
    Motorola = 3,
    Mfx = 4,
    #[fallback]
    Unknown = 7,
}
impl Default for Format {
    fn default() -> Self {Self::Dcc28}
}
impl Format {
    pub fn from_byte(byte: u8) -> Self {
        Self::from(u3::new(byte & 0x7))
    }
    pub fn to_byte(self) -> u8 {
        u3::from(self).value()
    }
}

/// track operating mode broadcast to all units
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum OperatingMode {
    /// track power off
    #[default]
    Stop = 0,
    /// normal operation
    Go = 1,
    /// power on, all locos halted
    Halt = 2,
    /// short circuit detected
    Short = 3,
}
impl TryFrom<u8> for OperatingMode {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::Stop),
            1 => Ok(Self::Go),
            2 => Ok(Self::Halt),
            3 => Ok(Self::Short),
            other => Err(other),
        }
    }
}

/// kind of extension modules counted by the configuration sub protocol
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleKind {
    /// s88 feedback modules
    Feedback = 0,
    Booster = 1,
    /// accessory decoders on the local bus
    Accessory = 2,
}
impl TryFrom<u8> for ModuleKind {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::Feedback),
            1 => Ok(Self::Booster),
            2 => Ok(Self::Accessory),
            other => Err(other),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_bytes_keep_bit7_clear() {
        let mut drive = Drive::from(0u8);
        drive.set_reverse(true);
        drive.set_emergency(true);
        drive.set_consist(true);
        drive.set_format(u3::new(7));
        assert_eq!(u8::from(drive), 0x3f);

        let mut refresh = Refresh::from(0u8);
        refresh.set_round(u3::new(7));
        refresh.set_state(u4::new(0xf));
        assert_eq!(u8::from(refresh), 0x7f);

        let mut high = CvHigh::from(0u8);
        high.set_cv(u3::new(3));
        high.set_msb(true);
        assert_eq!(u8::from(high), 0x43);
    }

    #[test]
    fn formats() {
        assert_eq!(Format::from_byte(2), Format::Dcc126);
        assert_eq!(Format::from_byte(6), Format::Unknown);
        assert_eq!(Format::Mfx.to_byte(), 4);
        let drive = Drive::from(0x1c);
        assert_eq!(Format::from(drive.format()), Format::Motorola);
        assert!(drive.consist());
        assert!(!drive.reverse());
    }

    #[test]
    fn packed_through_packbytes() {
        use packbytes::{FromBytes, ToBytes};

        let mut accessory = Accessory::from(0u8);
        accessory.set_thrown(true);
        accessory.set_on(true);
        assert_eq!(accessory.to_be_bytes(), [0x03]);
        assert_eq!(Accessory::from_be_bytes([0x02]).on(), true);
        assert_eq!(Drive::from_le_bytes([0x01]).reverse(), true);
    }
}
