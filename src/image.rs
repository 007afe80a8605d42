/*!
    sparse firmware image and the update frames cut from it

    the image is stored as 64 byte chunks aligned on 64 bytes and initialized to erased flash (0xff). Frames carry 64, 128 or 256 bytes of it to the unit's bootloader, each protected by a crc16 over start address and payload.

    ```text
    64B  : start:u16, data[64],  crc16:u16                  (68 bytes)
    128B : start:u16, data[128], crc16:u16                  (132 bytes)
    256B : start:u32, data[256], crc16:u16, fill:u16=0xfefe (264 bytes)
    ```
    multi byte fields are little endian
*/

use alloc::{
    collections::BTreeMap,
    vec::Vec,
    };
use crc::{Crc, CRC_16_MODBUS};
use log::*;
use packbytes::ToBytes;

use crate::hex::{self, Record, HexError};


/// bytes per chunk
pub const CHUNK: usize = 64;
/// value of erased flash
pub const ERASED: u8 = 0xff;
/// word streamed when there is nothing else to send
pub const FILLER: u32 = 0xfefe_fefe;

/// polynomial 0xa001 reflected, initial value 0xffff
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);


/// firmware image under construction, address ordered 64 byte chunks
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Image {
    chunks: BTreeMap<u32, [u8; CHUNK]>,
    /// maximum number of chunks, further writes are dropped
    limit: usize,
}
impl Image {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }
    pub fn with_limit(limit: usize) -> Self {
        Self {chunks: BTreeMap::new(), limit}
    }
    /// build an image from the lines of an Intel HEX file
    pub fn from_hex(text: &str, limit: usize) -> Result<Self, HexError> {
        let mut image = Self::with_limit(limit);
        let mut base = 0;
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            match hex::decode_line(line)? {
                Record::Data {offset, bytes} => image.write(base + u32::from(offset), &bytes),
                Record::Base(address) => base = address,
                Record::End => break,
                Record::Start => {},
            }
        }
        Ok(image)
    }
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
    /// number of chunks allocated
    pub fn len(&self) -> usize {
        self.chunks.len()
    }
    /// chunk starting at the given aligned address
    pub fn chunk(&self, base: u32) -> Option<&[u8; CHUNK]> {
        self.chunks.get(&base)
    }
    /// iterate over chunks with their base address
    pub fn chunks(&self) -> impl Iterator<Item=(u32, &[u8; CHUNK])> {
        self.chunks.iter().map(|(&base, bytes)| (base, bytes))
    }
    /**
        merge bytes into the image

        a write straddling a chunk boundary is split, the rest going to the following chunk, allocated if absent
    */
    pub fn write(&mut self, address: u32, bytes: &[u8]) {
        if bytes.is_empty()
            {return}
        let base = address & !(CHUNK as u32 - 1);
        let offset = (address - base) as usize;
        let here = bytes.len().min(CHUNK - offset);

        if !self.chunks.contains_key(&base) && self.chunks.len() >= self.limit {
            warn!("firmware image exceeds {} chunks, dropping {} bytes at {:#x}", self.limit, bytes.len(), address);
            return;
        }
        let chunk = self.chunks.entry(base).or_insert([ERASED; CHUNK]);
        chunk[offset .. offset + here].copy_from_slice(&bytes[.. here]);

        if here < bytes.len() {
            match address.checked_add(here as u32) {
                Some(next) => self.write(next, &bytes[here ..]),
                None => warn!("firmware image write past the end of address space at {:#x}", address),
            }
        }
    }
    /**
        cut the frame of the given size covering `address`

        the address is aligned down to the frame size. The frame is the end of image marker when no chunk exists at or after that address. The progress returned is the number of chunks before the frame.
    */
    pub fn block(&self, address: u32, size: BlockSize) -> (Frame, usize) {
        let length = size.len() as u32;
        let start = address & !(length - 1);
        let progress = self.chunks.range(.. start).count();

        if self.chunks.range(start ..).next().is_none() {
            return (Frame::end(size), progress);
        }
        let mut payload = [ERASED; 256];
        for (&base, bytes) in self.chunks.range(start .. start.saturating_add(length)) {
            let offset = (base - start) as usize;
            payload[offset .. offset + CHUNK].copy_from_slice(bytes);
        }
        (Frame::new(size, start, &payload[.. size.len()]), progress)
    }
}


/// payload size of an update frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockSize {
    B64,
    B128,
    B256,
}
impl BlockSize {
    pub const fn len(self) -> usize {
        match self {
            Self::B64 => 64,
            Self::B128 => 128,
            Self::B256 => 256,
        }
    }
}


/// crc16 of a frame, over the start field followed by the payload
pub fn crc16(start: &[u8], payload: &[u8]) -> u16 {
    let mut digest = CRC16.digest();
    digest.update(start);
    digest.update(payload);
    digest.finalize()
}

/// declare a frame type of one payload size
macro_rules! boot_frame {
    ($name:ident, $address:ty, $size:expr, $bytes:expr, $fill:expr) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            pub start: $address,
            pub payload: [u8; $size],
            pub crc: u16,
        }
        impl $name {
            /// frame and encoded length on the wire
            pub const BYTES: usize = $bytes;
            /// start address marking the end of the image
            pub const SENTINEL: $address = <$address>::MAX;

            pub fn new(start: $address, payload: [u8; $size]) -> Self {
                let crc = crc16(&start.to_le_bytes(), &payload);
                Self {start, payload, crc}
            }
            pub fn is_end(&self) -> bool {
                self.start == Self::SENTINEL
            }
        }
        impl ToBytes for $name {
            type Bytes = [u8; $bytes];

            fn to_le_bytes(self) -> Self::Bytes {
                let mut bytes = [$fill; $bytes];
                let address = self.start.to_le_bytes();
                let (head, rest) = bytes.split_at_mut(address.len());
                head.copy_from_slice(&address);
                rest[.. $size].copy_from_slice(&self.payload);
                rest[$size .. $size + 2].copy_from_slice(&self.crc.to_le_bytes());
                bytes
            }
            fn to_be_bytes(self) -> Self::Bytes {
                let mut bytes = [$fill; $bytes];
                let address = self.start.to_be_bytes();
                let (head, rest) = bytes.split_at_mut(address.len());
                head.copy_from_slice(&address);
                rest[.. $size].copy_from_slice(&self.payload);
                rest[$size .. $size + 2].copy_from_slice(&self.crc.to_be_bytes());
                bytes
            }
        }
    };
}
boot_frame!(Frame64, u16, 64, 68, 0);
boot_frame!(Frame128, u16, 128, 132, 0);
boot_frame!(Frame256, u32, 256, 264, 0xfe);


/// update frame of any size
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Small(Frame64),
    Medium(Frame128),
    Large(Frame256),
}
impl Frame {
    /// frame of the given size, the payload must have the size's length
    pub fn new(size: BlockSize, start: u32, payload: &[u8]) -> Self {
        match size {
            BlockSize::B64 => match u16::try_from(start) {
                Ok(start) if start != Frame64::SENTINEL => Self::Small(Frame64::new(start, fit(payload))),
                _ => Self::end(size),
            },
            BlockSize::B128 => match u16::try_from(start) {
                Ok(start) if start != Frame128::SENTINEL => Self::Medium(Frame128::new(start, fit(payload))),
                _ => Self::end(size),
            },
            BlockSize::B256 => Self::Large(Frame256::new(start, fit(payload))),
        }
    }
    /// end of image marker of the given size
    pub fn end(size: BlockSize) -> Self {
        match size {
            BlockSize::B64 => Self::Small(Frame64::new(Frame64::SENTINEL, [ERASED; 64])),
            BlockSize::B128 => Self::Medium(Frame128::new(Frame128::SENTINEL, [ERASED; 128])),
            BlockSize::B256 => Self::Large(Frame256::new(Frame256::SENTINEL, [ERASED; 256])),
        }
    }
    pub fn size(&self) -> BlockSize {
        match self {
            Self::Small(_) => BlockSize::B64,
            Self::Medium(_) => BlockSize::B128,
            Self::Large(_) => BlockSize::B256,
        }
    }
    pub fn start(&self) -> u32 {
        match self {
            Self::Small(frame) => u32::from(frame.start),
            Self::Medium(frame) => u32::from(frame.start),
            Self::Large(frame) => frame.start,
        }
    }
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Small(frame) => &frame.payload,
            Self::Medium(frame) => &frame.payload,
            Self::Large(frame) => &frame.payload,
        }
    }
    pub fn is_end(&self) -> bool {
        match self {
            Self::Small(frame) => frame.is_end(),
            Self::Medium(frame) => frame.is_end(),
            Self::Large(frame) => frame.is_end(),
        }
    }
    /// wire bytes, little endian
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::Small(frame) => frame.to_le_bytes().to_vec(),
            Self::Medium(frame) => frame.to_le_bytes().to_vec(),
            Self::Large(frame) => frame.to_le_bytes().to_vec(),
        }
    }
    /// wire bytes grouped in the 32 bit words streamed by the transport
    pub fn to_words(&self) -> Vec<u32> {
        self.to_bytes()
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect()
    }
}

fn fit<const N: usize>(payload: &[u8]) -> [u8; N] {
    let mut dst = [ERASED; N];
    let size = payload.len().min(N);
    dst[.. size].copy_from_slice(&payload[.. size]);
    dst
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_reference() {
        // CRC-16/MODBUS check value
        assert_eq!(crc16(b"1234", b"56789"), 0x4b37);
    }

    #[test]
    fn write_is_idempotent() {
        let bytes = [1, 2, 3, 4, 5];
        let mut once = Image::new();
        once.write(0x1010, &bytes);
        let mut twice = once.clone();
        twice.write(0x1010, &bytes);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 1);
    }

    #[test]
    fn write_splits_across_chunks() {
        let bytes = (0 .. 100u8).collect::<Vec<_>>();
        let mut image = Image::new();
        image.write(0x2030, &bytes);
        assert_eq!(image.len(), 3);

        let first = image.chunk(0x2000).unwrap();
        assert!(first[.. 0x30].iter().all(|&b| b == ERASED));
        assert_eq!(&first[0x30 ..], &bytes[.. 16]);
        let second = image.chunk(0x2040).unwrap();
        assert_eq!(&second[..], &bytes[16 .. 80]);
        let third = image.chunk(0x2080).unwrap();
        assert_eq!(&third[.. 20], &bytes[80 ..]);
        assert!(third[20 ..].iter().all(|&b| b == ERASED));

        let bases = image.chunks().map(|(base, _)| base).collect::<Vec<_>>();
        assert_eq!(bases, [0x2000, 0x2040, 0x2080]);
    }

    #[test]
    fn chunk_limit_drops_writes() {
        let mut image = Image::with_limit(1);
        image.write(0, &[1; 64]);
        image.write(64, &[2; 8]);
        assert_eq!(image.len(), 1);
        // already allocated chunks still accept data
        image.write(8, &[3; 8]);
        assert_eq!(image.chunk(0).unwrap()[8], 3);
    }

    #[test]
    fn block_gathers_chunks() {
        let mut image = Image::new();
        image.write(0x100, &[0xaa; 64]);
        image.write(0x180, &[0xbb; 64]);
        image.write(0x400, &[0xcc; 4]);

        let (frame, progress) = image.block(0x1c0, BlockSize::B256);
        assert_eq!(progress, 0);
        assert_eq!(frame.start(), 0x100);
        assert!(!frame.is_end());
        let payload = frame.payload();
        assert_eq!(payload.len(), 256);
        assert!(payload[.. 64].iter().all(|&b| b == 0xaa));
        assert!(payload[64 .. 128].iter().all(|&b| b == ERASED));
        assert!(payload[128 .. 192].iter().all(|&b| b == 0xbb));

        let (frame, progress) = image.block(0x400, BlockSize::B64);
        assert_eq!(progress, 2);
        assert_eq!(&frame.payload()[.. 4], &[0xcc; 4]);
    }

    #[test]
    fn block_past_the_image_is_end_marker() {
        let mut image = Image::new();
        image.write(0, &[0x11; 128]);
        for size in [BlockSize::B64, BlockSize::B128, BlockSize::B256] {
            let (frame, progress) = image.block(0x200, size);
            assert!(frame.is_end());
            assert_eq!(progress, 2);
            assert!(frame.payload().iter().all(|&b| b == ERASED));
            assert_eq!(frame.size(), size);
        }
        let (frame, _) = image.block(0x80, BlockSize::B64);
        assert!(frame.is_end());
        assert_eq!(frame.start(), 0xffff);
        let (frame, _) = image.block(0x100, BlockSize::B256);
        assert_eq!(frame.start(), 0xffff_ffff);
    }

    #[test]
    fn frame_layouts() {
        let frame = Frame::new(BlockSize::B64, 0x1234, &[0x55; 64]);
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), Frame64::BYTES);
        assert_eq!(&bytes[.. 2], &[0x34, 0x12]);
        let crc = crc16(&[0x34, 0x12], &[0x55; 64]);
        assert_eq!(&bytes[66 ..], &crc.to_le_bytes());

        let frame = Frame::new(BlockSize::B128, 0x80, &[0; 128]);
        assert_eq!(frame.to_bytes().len(), Frame128::BYTES);

        let frame = Frame::new(BlockSize::B256, 0x0001_0000, &[7; 256]);
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), Frame256::BYTES);
        assert_eq!(&bytes[.. 4], &[0, 0, 1, 0]);
        assert_eq!(&bytes[262 ..], &[0xfe, 0xfe]);
        let words = frame.to_words();
        assert_eq!(words.len(), 66);
        assert_eq!(words[0], 0x0001_0000);
        assert_eq!(words[65], u32::from_le_bytes([bytes[260], bytes[261], 0xfe, 0xfe]));
    }

    #[test]
    fn small_frames_cannot_reach_high_addresses() {
        let frame = Frame::new(BlockSize::B64, 0x1_0000, &[0; 64]);
        assert!(frame.is_end());
    }

    #[test]
    fn image_from_hex() {
        let text = "\
            :020000040001F9\n\
            :0400100001020304E2\n\
            :00000001FF\n\
            :0400200005060708BE\n";
        let image = Image::from_hex(text, 16).unwrap();
        assert_eq!(image.len(), 1);
        let chunk = image.chunk(0x0001_0000).unwrap();
        assert_eq!(&chunk[0x10 .. 0x14], &[1, 2, 3, 4]);
        assert_eq!(chunk[0x20], ERASED);

        assert_eq!(Image::from_hex(":0400100001020304E3\n", 16), Err(HexError::BadChecksum));
    }
}
