/*!
    EasyNet blocks, the fixed size frames exchanged in normal bus operation

    ```text
    byte0: address   (bit7=1 marks frame start, 0xff = broadcast)
    byte1: command   (bit7=0)
    byte2..7: data   (bit7=0 on each)
    byte8: crc       (crc8 of bytes 0..8, complemented when >= 0x80)
    ```
*/

use crc::{Crc, CRC_8_SMBUS};
use packbytes::{FromBytes, ToBytes};


/// number of bytes of a block on the wire
pub const BLOCK: usize = 9;
/// number of data bytes in a block
pub const DATA: usize = 6;
/// address byte received by all units
pub const BROADCAST: u8 = 0xff;
/// high bit marking the first byte of a block
pub const SYNC: u8 = 0x80;
/// number of unit slots on the bus
pub const UNITS: usize = 64;

/// polynomial 0x07, initial value 0, msb first
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);


/// bus message
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Block {
    /// unit address with [SYNC] set, or [BROADCAST]
    pub address: u8,
    /// command or answer code, 7 bits
    pub command: u8,
    /// payload, 7 bits per byte
    pub data: [u8; DATA],
    /// checksum as produced by [encode_crc]
    pub crc: u8,
}
impl Block {
    /// build a block and compute its checksum
    pub fn new(address: u8, command: u8, data: [u8; DATA]) -> Self {
        let mut block = Self {address, command, data, crc: 0};
        block.crc = encode_crc(&block.prefix());
        block
    }
    /// block addressed to all units
    pub fn broadcast(command: u8, data: [u8; DATA]) -> Self {
        Self::new(BROADCAST, command, data)
    }
    /// block addressed to the unit in the given slot
    pub fn unit(unit: u8, command: u8, data: [u8; DATA]) -> Self {
        Self::new(unit_address(unit), command, data)
    }
    /// the 8 bytes covered by the checksum
    pub fn prefix(&self) -> [u8; 8] {
        let mut bytes = [0; 8];
        bytes[0] = self.address;
        bytes[1] = self.command;
        bytes[2 ..].copy_from_slice(&self.data);
        bytes
    }
    pub fn is_broadcast(&self) -> bool {
        self.address == BROADCAST
    }
    /// slot index of the sending or receiving unit, if the address designates one
    pub fn unit_index(&self) -> Option<u8> {
        unit_index(self.address)
    }
}

impl ToBytes for Block {
    type Bytes = [u8; BLOCK];

    fn to_le_bytes(self) -> Self::Bytes {
        self.to_be_bytes()
    }
    fn to_be_bytes(self) -> Self::Bytes {
        let mut bytes = [0; BLOCK];
        bytes[.. 8].copy_from_slice(&self.prefix());
        bytes[8] = self.crc;
        bytes
    }
}
impl FromBytes for Block {
    type Bytes = [u8; BLOCK];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        Self::from_be_bytes(bytes)
    }
    fn from_be_bytes(bytes: Self::Bytes) -> Self {
        let mut data = [0; DATA];
        data.copy_from_slice(&bytes[2 .. 8]);
        Self {
            address: bytes[0],
            command: bytes[1],
            data,
            crc: bytes[8],
        }
    }
}


/// crc8 of the address, command and data bytes
pub fn crc8(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}
/// checksum byte as transmitted, never carrying the [SYNC] bit
pub fn encode_crc(bytes: &[u8]) -> u8 {
    let crc = crc8(bytes);
    if crc >= SYNC {!crc}
    else {crc}
}
/// check framing bits and checksum of a received block
pub fn validate(block: &Block) -> bool {
    let bytes = block.prefix();
    let head = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let tail = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    // only bit 31, the address sync bit, may be set
    head & 0x0080_8080 == 0
        && tail & 0x8080_8080 == 0
        && block.crc == encode_crc(&bytes)
}

/// address byte of a unit slot
pub const fn unit_address(unit: u8) -> u8 {
    SYNC | (unit & 0x3f)
}
/// slot designated by an address byte, broadcast and invalid addresses give nothing
pub const fn unit_index(address: u8) -> Option<u8> {
    if address & 0xc0 == SYNC {Some(address & 0x3f)}
    else {None}
}

/// split a 14 bit value into two 7 bit bytes, high part first
pub const fn split14(value: u16) -> [u8; 2] {
    [((value >> 7) & 0x7f) as u8, (value & 0x7f) as u8]
}
/// join two 7 bit bytes, high part first
pub const fn join14(high: u8, low: u8) -> u16 {
    ((high as u16 & 0x7f) << 7) | (low as u16 & 0x7f)
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn crc8_reference() {
        // CRC-8/SMBUS check value
        assert_eq!(crc8(b"123456789"), 0xf4);
        assert_eq!(crc8(&[0; 8]), 0);
    }

    #[test]
    fn encoded_crc_never_syncs() {
        for byte in 0 ..= 255u8 {
            let prefix = [0x81, 0x12, byte & 0x7f, 0, 0, 0, 0, byte >> 1];
            assert!(encode_crc(&prefix) < SYNC);
        }
    }

    #[test]
    fn validate_table() {
        let good = Block::new(0x85, 0x12, [1, 2, 3, 4, 5, 6]);
        assert!(validate(&good));

        let cases: [(&str, fn(&mut Block)); 6] = [
            ("command high bit", |b| b.command |= 0x80),
            ("data0 high bit", |b| b.data[0] |= 0x80),
            ("data1 high bit", |b| b.data[1] |= 0x80),
            ("data5 high bit", |b| b.data[5] |= 0x80),
            ("crc mismatch", |b| b.crc ^= 1),
            ("payload changed", |b| b.data[3] ^= 0x10),
        ];
        for (name, corrupt) in cases {
            let mut block = good;
            corrupt(&mut block);
            assert!(!validate(&block), "{} should not validate", name);
        }
    }

    #[test]
    fn crc_roundtrip_sampled() {
        let mut rng = rand::rng();
        for _ in 0 .. 10_000 {
            let mut prefix = [0u8; 8];
            rng.fill(&mut prefix[..]);
            prefix[0] |= SYNC;
            for byte in &mut prefix[1 ..] {
                *byte &= 0x7f;
            }
            let crc: u8 = rng.random();
            let block = Block::from_be_bytes({
                let mut bytes = [0; BLOCK];
                bytes[.. 8].copy_from_slice(&prefix);
                bytes[8] = crc;
                bytes
            });
            assert_eq!(validate(&block), crc == encode_crc(&prefix));
        }
    }

    #[test]
    fn valid_blocks_sync_only_on_address() {
        let mut rng = rand::rng();
        for _ in 0 .. 10_000 {
            let mut bytes = [0u8; BLOCK];
            rng.fill(&mut bytes[..]);
            let mut block = Block::from_be_bytes(bytes);
            block.crc = encode_crc(&block.prefix());
            if validate(&block) {
                let synced = block.prefix().iter().filter(|&&b| b & SYNC != 0).count();
                assert!(synced <= 1);
                assert!(synced == 0 || block.address & SYNC != 0);
            }
        }
    }

    #[test]
    fn wire_layout() {
        let block = Block::broadcast(0x40, [0, 3, 0, 0, 0, 0]);
        let bytes = block.to_be_bytes();
        assert_eq!(bytes[0], BROADCAST);
        assert_eq!(bytes[1], 0x40);
        assert_eq!(&bytes[2 .. 8], &[0, 3, 0, 0, 0, 0]);
        assert_eq!(bytes[8], encode_crc(&bytes[.. 8]));
        assert_eq!(Block::from_be_bytes(bytes), block);
        assert!(block.is_broadcast());
    }

    #[test]
    fn unit_addresses() {
        assert_eq!(unit_address(0), 0x80);
        assert_eq!(unit_address(63), 0xbf);
        assert_eq!(unit_index(0xbf), Some(63));
        assert_eq!(unit_index(BROADCAST), None);
        assert_eq!(unit_index(0xc5), None);
        assert_eq!(unit_index(0x05), None);
    }

    #[test]
    fn seven_bit_pairs() {
        assert_eq!(split14(42), [0, 42]);
        assert_eq!(split14(10_239), [0x4f, 0x7f]);
        assert_eq!(join14(0x4f, 0x7f), 10_239);
        assert_eq!(join14(split14(0x3fff)[0], split14(0x3fff)[1]), 0x3fff);
    }
}
