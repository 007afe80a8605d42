/*!
    state machine of a remote firmware update

    the unit's bootloader drives the transfer with single ASCII characters, the master answers with image frames

    | char | meaning |
    |---|---|
    | `*` `+` `-` | send the next 256, 128 or 64 byte frame |
    | `#` `?` `%` | repeat the last frame of that size |
    | `A` | address error, restart from address 0 |
    | `C` | crc error at the unit |
    | `T` | timeout, also the startup handshake |
    | `L` | length error |
    | `F` | the unit received the end of image frame |
*/

use log::*;

use crate::image::{Image, Frame, BlockSize};


/// state of an update session
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum State {
    /// waiting for the handshake
    #[default]
    Startup,
    BlockTransmit,
    BlockRepeat,
    /// the end of image frame has been sent
    EndBlock,
    /// desynchronized, waiting for the unit to retry
    Recover,
    /// terminal
    Finished,
}

/// what the unit asked for
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Request {
    Next(BlockSize),
    Repeat(BlockSize),
    AddressError,
    CrcError,
    Timeout,
    LengthError,
    Finished,
}
impl Request {
    fn parse(byte: u8) -> Option<Self> {
        Some(match byte {
            b'*' => Self::Next(BlockSize::B256),
            b'+' => Self::Next(BlockSize::B128),
            b'-' => Self::Next(BlockSize::B64),
            b'#' => Self::Repeat(BlockSize::B256),
            b'?' => Self::Repeat(BlockSize::B128),
            b'%' => Self::Repeat(BlockSize::B64),
            b'A' => Self::AddressError,
            b'C' => Self::CrcError,
            b'T' => Self::Timeout,
            b'L' => Self::LengthError,
            b'F' => Self::Finished,
            _ => return None,
        })
    }
}

/// update session progress
#[derive(Clone, Debug, Default)]
pub struct Machine {
    state: State,
    /// start address of the current frame
    address: u32,
    /// size of the last frame sent, none before the first one
    last: Option<BlockSize>,
    /// number of image chunks before the current frame
    progress: usize,
}
impl Machine {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn state(&self) -> State {self.state}
    pub fn address(&self) -> u32 {self.address}
    pub fn progress(&self) -> usize {self.progress}
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /**
        process one character received from the unit

        returns the frame to transmit in response, if any
    */
    pub fn input(&mut self, byte: u8, image: &Image) -> Option<Frame> {
        let request = Request::parse(byte);
        match (self.state, request) {
            (State::Finished, _) => None,
            (State::Startup, Some(Request::Timeout)) => {
                debug!("bootloader handshake");
                self.state = State::BlockTransmit;
                None
            },
            (State::Startup, _) => None,
            (_, None) => {
                debug!("unexpected bootloader character {:#04x}, resynchronizing", byte);
                self.address = 0;
                self.last = None;
                self.state = State::Startup;
                None
            },
            (_, Some(Request::Next(size))) => {
                if let Some(last) = self.last {
                    self.address = self.address.wrapping_add(last.len() as u32);
                }
                Some(self.send(size, image))
            },
            (state, Some(Request::Repeat(size))) => {
                self.state = match state {
                    State::BlockRepeat | State::Recover => State::Recover,
                    _ => State::BlockRepeat,
                    };
                Some(self.resend(size, image))
            },
            (_, Some(Request::AddressError)) => {
                self.address = 0;
                self.last = None;
                None
            },
            (_, Some(Request::CrcError)) => {
                self.state = State::Recover;
                None
            },
            (State::Recover, Some(Request::Timeout)) => {
                self.state = State::BlockTransmit;
                let size = self.last.unwrap_or(BlockSize::B256);
                Some(self.resend(size, image))
            },
            (_, Some(Request::Timeout)) => {
                self.state = State::Recover;
                None
            },
            (State::Recover, Some(Request::LengthError)) => {
                self.state = State::BlockTransmit;
                None
            },
            (_, Some(Request::LengthError)) => None,
            (_, Some(Request::Finished)) => {
                info!("firmware update finished");
                self.state = State::Finished;
                None
            },
        }
    }

    /// send the frame at the current address, moving to the end state when the image is exhausted
    fn send(&mut self, size: BlockSize, image: &Image) -> Frame {
        let frame = self.resend(size, image);
        self.state = if frame.is_end() {State::EndBlock} else {State::BlockTransmit};
        frame
    }
    /// frame at the current address, without changing state
    fn resend(&mut self, size: BlockSize, image: &Image) -> Frame {
        let (frame, progress) = image.block(self.address, size);
        if !frame.is_end() {
            self.address = frame.start();
        }
        self.last = Some(size);
        self.progress = progress;
        trace!("frame {:?} at {:#x}, {} chunks done", size, frame.start(), progress);
        frame
    }
}
