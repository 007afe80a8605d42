use core::sync::atomic::{AtomicU8, Ordering::*};
use packbytes::{FromBytes, ToBytes};
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt, BufReader},
    sync::Notify,
    };
use std::{
    io,
    path::Path,
    time::Duration,
    };
use log::*;

use crate::{
    block::{Block, BLOCK, SYNC, validate},
    image::FILLER,
    queue::Queue,
    };
use super::{Error, Config, Mode, Transport};


/// capacity of the received blocks queue
pub const INBOUND: usize = 64;
/// capacity of the blocks to transmit queue
pub const OUTBOUND: usize = 32;
/// capacity of the received bootloader characters queue
pub const CHARS: usize = 64;
/// capacity of the words to stream queue, enough for 3 frames of the largest size
pub const WORDS: usize = 256;
/// words written at once in boot stream mode
const BURST: usize = 16;
/// polling period while waiting for a mode switch
const SETTLE: Duration = Duration::from_micros(500);


/**
    [Transport] over an async byte stream, usually a uart

    the queues are filled and drained by [Self::run], which plays the role of the interrupt handlers and **must** be running for any exchange or mode switch to happen
*/
pub struct Link {
    /// mode wanted by the consumer
    requested: AtomicU8,
    /// mode currently used by the transmit half
    active: AtomicU8,
    inbound: Queue<Block, INBOUND>,
    outbound: Queue<Block, OUTBOUND>,
    chars: Queue<u8, CHARS>,
    words: Queue<u32, WORDS>,
    /// something was queued for the transmit half, or the mode changed
    pending: Notify,
    /// the transmit half freed some room
    freed: Notify,
    /// a character was received
    arrived: Notify,
    /// silence after each transmitted block
    pause: Duration,
}

impl Link {
    pub fn new(config: &Config) -> Self {
        Self {
            requested: AtomicU8::new(Mode::Block as u8),
            active: AtomicU8::new(Mode::Block as u8),
            inbound: Queue::new(),
            outbound: Queue::new(),
            chars: Queue::new(),
            words: Queue::new(),
            pending: Notify::new(),
            freed: Notify::new(),
            arrived: Notify::new(),
            pause: config.pause,
        }
    }
    fn requested(&self) -> Mode {
        Mode::from_u8(self.requested.load(Acquire))
    }
    fn clear(&self) {
        self.inbound.clear();
        self.outbound.clear();
        self.chars.clear();
        self.words.clear();
    }

    /**
        coroutine moving bytes between the queues and the given stream halves

        it **must** be running in order to exchange anything. It only returns on stream failure.
    */
    pub async fn run(&self, rx: impl AsyncRead + Unpin, tx: impl AsyncWrite + Unpin) -> io::Result<()> {
        tokio::try_join!(self.receive(rx), self.transmit(tx))?;
        Ok(())
    }

    async fn receive(&self, rx: impl AsyncRead + Unpin) -> io::Result<()> {
        let mut rx = BufReader::new(rx);
        let mut frame = [0u8; BLOCK];
        let mut filled = 0;
        loop {
            let byte = rx.read_u8().await?;
            match self.requested() {
                Mode::BootStream => {
                    filled = 0;
                    // indistinguishable from an idle line
                    if byte == 0x00 || byte == 0xff
                        {continue}
                    if !self.chars.push_or_drop(byte) {
                        debug!("dropped bootloader character {:#04x}", byte);
                    }
                    self.arrived.notify_one();
                },
                Mode::Block => {
                    // a byte with the sync bit always starts a new block
                    if byte & SYNC != 0
                        {filled = 0}
                    else if filled == 0 {
                        trace!("skipping unsynchronized byte {:#04x}", byte);
                        continue
                    }
                    frame[filled] = byte;
                    filled += 1;
                    if filled < BLOCK
                        {continue}
                    filled = 0;

                    let block = Block::from_be_bytes(frame);
                    if !validate(&block) {
                        debug!("dropped malformed block {:02x?}", frame);
                    }
                    else if !self.inbound.push_or_drop(block) {
                        warn!("inbound queue full, dropped {:?}", block);
                    }
                },
            }
        }
    }

    async fn transmit(&self, mut tx: impl AsyncWrite + Unpin) -> io::Result<()> {
        loop {
            let mode = self.requested();
            if mode != self.mode() {
                tx.flush().await?;
                self.active.store(mode as u8, Release);
                debug!("link switched to {:?} mode", mode);
            }
            match mode {
                Mode::Block => match self.outbound.pop() {
                    Some(block) => {
                        self.freed.notify_one();
                        tx.write_all(&block.to_be_bytes()).await?;
                        tx.flush().await?;
                        // the transmitter erratum requires the line to rest before the next block
                        tokio::time::sleep(self.pause).await;
                    },
                    None => self.pending.notified().await,
                },
                Mode::BootStream => {
                    let mut bytes = [0u8; 4*BURST];
                    let mut count = 0;
                    while count < BURST {
                        let Some(word) = self.words.pop() else {break};
                        bytes[4*count .. 4*count+4].copy_from_slice(&word.to_le_bytes());
                        count += 1;
                    }
                    if count != 0 {
                        self.freed.notify_one();
                        tx.write_all(&bytes[.. 4*count]).await?;
                        tx.flush().await?;
                    }
                    else {
                        // the bootloader expects the line to never idle
                        tx.write_all(&FILLER.to_le_bytes()).await?;
                        tx.flush().await?;
                        tokio::time::timeout(self.pause, self.pending.notified()).await.ok();
                    }
                },
            }
        }
    }
}

impl Transport for Link {
    async fn set_mode(&self, mode: Mode) {
        if self.requested() == mode && self.mode() == mode
            {return}
        self.requested.store(mode as u8, Release);
        self.clear();
        self.pending.notify_one();
        while self.mode() != mode {
            tokio::time::sleep(SETTLE).await;
        }
        debug!("transport now in {:?} mode", mode);
    }
    fn mode(&self) -> Mode {
        Mode::from_u8(self.active.load(Acquire))
    }

    fn try_recv_block(&self) -> Option<Block> {
        self.inbound.pop()
    }
    async fn send_block(&self, block: Block, timeout: Duration) -> Result<(), Error> {
        if self.mode() != Mode::Block
            {return Err(Error::Master("link is not in block mode"))}
        tokio::time::timeout(timeout, async {
            while self.outbound.push(block).is_err() {
                self.freed.notified().await;
            }
            self.pending.notify_one();
        }).await
            .map_err(|_| Error::QueueFull)
    }

    async fn flush(&self) {
        while !self.outbound.is_empty() {
            self.freed.notified().await;
        }
    }

    async fn recv_char(&self, timeout: Duration) -> Option<u8> {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(byte) = self.chars.pop()
                    {break byte}
                self.arrived.notified().await;
            }
        }).await.ok()
    }
    async fn send_words(&self, words: &[u32]) -> Result<(), Error> {
        if self.mode() != Mode::BootStream
            {return Err(Error::Master("link is not in boot stream mode"))}
        for &word in words {
            while self.words.push(word).is_err() {
                self.pending.notify_one();
                self.freed.notified().await;
            }
        }
        self.pending.notify_one();
        Ok(())
    }

    fn dropped(&self) -> u32 {
        self.inbound.dropped() + self.chars.dropped()
    }
}


/// open a uart for the bus, returning a receive and a transmit handle to the same port
pub fn open_port(path: impl AsRef<Path>, rate: u32) -> Result<(SerialPort, SerialPort), Error> {
    let receive = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
            settings.set_raw();
            settings.set_baud_rate(rate)?;
            settings.set_char_size(CharSize::Bits8);
            settings.set_stop_bits(StopBits::One);
            settings.set_parity(Parity::None);
            Ok(settings)
            })?;
    let transmit = receive.try_clone()?;
    Ok((receive, transmit))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, DuplexStream};
    use crate::codes;

    fn link() -> (Link, DuplexStream, DuplexStream) {
        let config = Config::default().with_pause(Duration::from_millis(1));
        let (master, unit) = duplex(1 << 16);
        (Link::new(&config), master, unit)
    }

    async fn settle(ready: impl Fn() -> bool) {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn receive_resynchronizes() {
        let (link, master, mut unit) = link();
        let (rx, tx) = split(master);
        let block = Block::unit(3, codes::PING, [0; 6]);
        let bytes = block.to_be_bytes();
        let mut corrupted = bytes;
        corrupted[4] ^= 1;

        let test = async {
            // noise, a truncated block, a good block, a corrupted block, a good block
            unit.write_all(&[0x12, 0x34]).await.unwrap();
            unit.write_all(&bytes[.. 5]).await.unwrap();
            unit.write_all(&bytes).await.unwrap();
            unit.write_all(&corrupted).await.unwrap();
            unit.write_all(&bytes).await.unwrap();
            settle(|| link.inbound.len() >= 2).await;
            tokio::time::sleep(Duration::from_millis(5)).await;

            assert_eq!(link.try_recv_block(), Some(block));
            assert_eq!(link.try_recv_block(), Some(block));
            assert_eq!(link.try_recv_block(), None);
            assert_eq!(link.dropped(), 0);
        };
        tokio::select! {
            result = link.run(rx, tx) => panic!("link stopped: {:?}", result),
            _ = test => {},
        }
    }

    #[tokio::test]
    async fn transmit_blocks() {
        let (link, master, mut unit) = link();
        let (rx, tx) = split(master);
        let blocks = [
            Block::broadcast(codes::STATUS, [1, 0, 0, 0, 0, 0]),
            Block::unit(12, codes::PING, [0; 6]),
            ];
        let test = async {
            for block in blocks {
                link.send_block(block, Duration::from_millis(20)).await.unwrap();
            }
            for block in blocks {
                let mut bytes = [0; BLOCK];
                unit.read_exact(&mut bytes).await.unwrap();
                assert_eq!(Block::from_be_bytes(bytes), block);
            }
        };
        tokio::select! {
            result = link.run(rx, tx) => panic!("link stopped: {:?}", result),
            _ = test => {},
        }
    }

    #[tokio::test]
    async fn flush_waits_for_the_driver() {
        let (link, master, mut unit) = link();
        let (rx, tx) = split(master);
        let test = async {
            for i in 0 .. 5 {
                link.send_block(Block::unit(i, codes::PING, [0; 6]), Duration::from_millis(20)).await.unwrap();
            }
            assert!(!link.outbound.is_empty());
            link.flush().await;
            assert!(link.outbound.is_empty());
            let mut bytes = [0; 5 * BLOCK];
            unit.read_exact(&mut bytes).await.unwrap();
            // nothing queued returns at once
            link.flush().await;
        };
        tokio::select! {
            result = link.run(rx, tx) => panic!("link stopped: {:?}", result),
            _ = test => {},
        }
    }

    #[tokio::test]
    async fn inbound_overflow_is_counted() {
        let (link, master, mut unit) = link();
        let (rx, tx) = split(master);
        let test = async {
            for i in 0 .. INBOUND + 6 {
                let block = Block::unit(1, codes::DEBUG, [i as u8 & 0x7f, 0, 0, 0, 0, 0]);
                unit.write_all(&block.to_be_bytes()).await.unwrap();
            }
            settle(|| link.dropped() == 6).await;
            assert_eq!(link.inbound.len(), INBOUND);
            // the oldest blocks were kept
            assert_eq!(link.try_recv_block().unwrap().data[0], 0);
        };
        tokio::select! {
            result = link.run(rx, tx) => panic!("link stopped: {:?}", result),
            _ = test => {},
        }
    }

    #[tokio::test]
    async fn boot_stream_personality() {
        let (link, master, mut unit) = link();
        let (rx, tx) = split(master);
        let test = async {
            link.set_mode(Mode::BootStream).await;
            assert_eq!(link.mode(), Mode::BootStream);
            assert!(link.send_block(Block::unit(1, codes::PING, [0; 6]), Duration::from_millis(5)).await.is_err());

            unit.write_all(&[0x00, b'T', 0xff, 0xff, b'*']).await.unwrap();
            assert_eq!(link.recv_char(Duration::from_secs(1)).await, Some(b'T'));
            assert_eq!(link.recv_char(Duration::from_secs(1)).await, Some(b'*'));
            assert_eq!(link.recv_char(Duration::from_millis(20)).await, None);

            link.send_words(&[0x1122_3344, 0x5566_7788]).await.unwrap();
            let mut received = Vec::new();
            while received.len() < 2 {
                let word = unit.read_u32_le().await.unwrap();
                if word != FILLER {
                    received.push(word);
                }
            }
            assert_eq!(received, [0x1122_3344, 0x5566_7788]);

            link.set_mode(Mode::Block).await;
            assert_eq!(link.mode(), Mode::Block);
            assert!(link.send_words(&[1]).await.is_err());
            link.send_block(Block::unit(2, codes::PING, [0; 6]), Duration::from_millis(20)).await.unwrap();
        };
        tokio::select! {
            result = link.run(rx, tx) => panic!("link stopped: {:?}", result),
            _ = test => {},
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_times_out_when_nothing_drains() {
        let (link, _master, _unit) = link();
        for _ in 0 .. OUTBOUND {
            link.send_block(Block::unit(0, codes::PING, [0; 6]), Duration::from_millis(20)).await.unwrap();
        }
        let result = link.send_block(Block::unit(0, codes::PING, [0; 6]), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::QueueFull)));
    }
}
