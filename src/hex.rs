/*!
    Intel HEX record decoding, one text line at a time
*/

use core::fmt;
use heapless::Vec;


/// maximum payload of a record
pub const RECORD: usize = 255;

/// decoded line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// bytes to place at `offset` relative to the current base address
    Data {offset: u16, bytes: Vec<u8, RECORD>},
    /// end of file
    End,
    /// new base address, already shifted: segment * 16 or upper * 65536
    Base(u32),
    /// entry point records, irrelevant for flashing
    Start,
}

/// malformed line
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HexError {
    /// line does not start with ':'
    MissingColon,
    /// odd number of digits or non hexadecimal character
    BadDigit,
    /// byte count does not match the line length
    BadLength,
    /// record checksum mismatch
    BadChecksum,
    /// record type not defined by the format
    UnknownType(u8),
}
impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingColon => write!(f, "hex record must start with ':'"),
            Self::BadDigit => write!(f, "invalid hexadecimal digits in record"),
            Self::BadLength => write!(f, "record length does not match its byte count"),
            Self::BadChecksum => write!(f, "record checksum mismatch"),
            Self::UnknownType(kind) => write!(f, "unknown record type {:#04x}", kind),
        }
    }
}
impl core::error::Error for HexError {}


/// decode one line of an Intel HEX file, surrounding whitespace is ignored
pub fn decode_line(line: &str) -> Result<Record, HexError> {
    let line = line.trim();
    let digits = line.strip_prefix(':').ok_or(HexError::MissingColon)?.as_bytes();
    if digits.len() % 2 != 0 || digits.len() < 10
        {return Err(HexError::BadLength)}

    let mut raw = Vec::<u8, {RECORD + 5}>::new();
    for pair in digits.chunks(2) {
        let byte = (nibble(pair[0])? << 4) | nibble(pair[1])?;
        raw.push(byte).map_err(|_| HexError::BadLength)?;
    }
    let count = usize::from(raw[0]);
    if raw.len() != count + 5
        {return Err(HexError::BadLength)}
    if raw.iter().fold(0u8, |sum, &b| sum.wrapping_add(b)) != 0
        {return Err(HexError::BadChecksum)}

    let offset = u16::from_be_bytes([raw[1], raw[2]]);
    let payload = &raw[4 .. 4 + count];
    match raw[3] {
        0x00 => {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(payload).map_err(|_| HexError::BadLength)?;
            Ok(Record::Data {offset, bytes})
        },
        0x01 => Ok(Record::End),
        0x02 => Ok(Record::Base(u32::from(word(payload)?) << 4)),
        0x04 => Ok(Record::Base(u32::from(word(payload)?) << 16)),
        0x03 | 0x05 => Ok(Record::Start),
        other => Err(HexError::UnknownType(other)),
    }
}

fn word(payload: &[u8]) -> Result<u16, HexError> {
    match payload {
        &[high, low] => Ok(u16::from_be_bytes([high, low])),
        _ => Err(HexError::BadLength),
    }
}

fn nibble(digit: u8) -> Result<u8, HexError> {
    match digit {
        b'0' ..= b'9' => Ok(digit - b'0'),
        b'a' ..= b'f' => Ok(digit - b'a' + 10),
        b'A' ..= b'F' => Ok(digit - b'A' + 10),
        _ => Err(HexError::BadDigit),
    }
}
