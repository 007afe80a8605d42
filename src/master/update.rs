use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use log::*;

use crate::{
    boot::Machine,
    image::Image,
    };
use super::{Error, Config, Transport};


/**
    firmware update session over a transport in boot stream mode

    the session fails when a character takes longer than the character timeout, or when the whole transfer exceeds the session timeout. A failed session cannot be resumed, the next one starts from address 0.
*/
pub struct Updater<'t, T> {
    transport: &'t T,
    char_timeout: Duration,
    session_timeout: Duration,
    machine: Machine,
}
impl<'t, T: Transport> Updater<'t, T> {
    pub fn new(transport: &'t T, config: &Config) -> Self {
        Self {
            transport,
            char_timeout: config.char_timeout,
            session_timeout: config.session_timeout,
            machine: Machine::new(),
        }
    }
    pub fn machine(&self) -> &Machine {&self.machine}

    /// transfer the image, returning once the unit confirmed the end of image
    pub async fn run(&mut self, image: &Image) -> Result<(), Error> {
        let deadline = Instant::now() + self.session_timeout;
        timeout_at(deadline, self.session(image)).await
            .map_err(|_| Error::Timeout)?
    }

    async fn session(&mut self, image: &Image) -> Result<(), Error> {
        let total = image.len();
        let mut reported = usize::MAX;
        while !self.machine.is_finished() {
            let byte = self.transport.recv_char(self.char_timeout).await
                .ok_or(Error::Timeout)?;
            trace!("bootloader sent {:?} in {:?}", char::from(byte), self.machine.state());
            if let Some(frame) = self.machine.input(byte, image) {
                self.transport.send_words(&frame.to_words()).await?;
                let progress = self.machine.progress();
                if progress != reported {
                    debug!("firmware update progress {}/{} chunks", progress, total);
                    reported = progress;
                }
            }
        }
        Ok(())
    }
}
