use std::{sync::Arc, time::Duration};

use crate::block::Block;
use super::Error;


/// framing discipline of the bus
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// 9 byte blocks, normal operation
    #[default]
    Block = 0,
    /// words toward a bootloader, single characters back
    BootStream = 1,
}
impl Mode {
    pub(crate) fn from_u8(value: u8) -> Self {
        if value == Self::BootStream as u8 {Self::BootStream}
        else {Self::Block}
    }
}

/**
    duplex channel to the units

    inbound items are queued in arrival order by a lower level driver, methods here only enqueue and dequeue. Overflowing inbound items are dropped and counted in [Self::dropped].
*/
#[allow(async_fn_in_trait)]
pub trait Transport {
    /**
        switch the framing discipline, dropping anything queued in either direction

        returns only once the driver stopped using the previous mode
    */
    async fn set_mode(&self, mode: Mode);
    /// current framing discipline
    fn mode(&self) -> Mode;

    /// next received block, without waiting
    fn try_recv_block(&self) -> Option<Block>;
    /// queue a block for transmission, failing if there is no room within `timeout`
    async fn send_block(&self, block: Block, timeout: Duration) -> Result<(), Error>;
    /// wait until every queued block was handed to the driver
    async fn flush(&self);

    /// next character from a bootloader, bytes 0x00 and 0xff excluded
    async fn recv_char(&self, timeout: Duration) -> Option<u8>;
    /// stream words to a bootloader
    async fn send_words(&self, words: &[u32]) -> Result<(), Error>;

    /// number of inbound items dropped on overflow
    fn dropped(&self) -> u32;
}

impl<T: Transport> Transport for Arc<T> {
    async fn set_mode(&self, mode: Mode) {
        self.as_ref().set_mode(mode).await
    }
    fn mode(&self) -> Mode {
        self.as_ref().mode()
    }
    fn try_recv_block(&self) -> Option<Block> {
        self.as_ref().try_recv_block()
    }
    async fn send_block(&self, block: Block, timeout: Duration) -> Result<(), Error> {
        self.as_ref().send_block(block, timeout).await
    }
    async fn flush(&self) {
        self.as_ref().flush().await
    }
    async fn recv_char(&self, timeout: Duration) -> Option<u8> {
        self.as_ref().recv_char(timeout).await
    }
    async fn send_words(&self, words: &[u32]) -> Result<(), Error> {
        self.as_ref().send_words(words).await
    }
    fn dropped(&self) -> u32 {
        self.as_ref().dropped()
    }
}
