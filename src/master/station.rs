use core::sync::atomic::{AtomicBool, Ordering::*};
use bilge::prelude::*;
use std::time::Duration;
use log::*;

use crate::{
    block::{Block, DATA, UNITS},
    codes::{self, Format, Refresh},
    table::DeviceTable,
    discovery::Discovery,
    image::Image,
    };
use super::{Error, Config, Mode, Transport, Layout, Events, Updater};


/// schedule position of a discovery step
pub const DISCOVERY: u8 = UNITS as u8;
/// schedule position of the status broadcast
pub const STATUS: u8 = DISCOVERY + 1;

/// polling period while waiting for a station to stop
const SETTLE: Duration = Duration::from_millis(1);


/**
    cooperative stop request for [Station::run]

    [Self::stop] returns once the loop confirmed termination, the station can then be used exclusively, for instance for a firmware update
*/
#[derive(Debug, Default)]
pub struct Stopper {
    requested: AtomicBool,
    running: AtomicBool,
}
impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_requested(&self) -> bool {
        self.requested.load(Acquire)
    }
    pub fn is_running(&self) -> bool {
        self.running.load(Acquire)
    }
    /// request the loop to stop and wait for its confirmation, nothing is latched when no loop is running
    pub async fn stop(&self) {
        if !self.is_running()
            {return}
        self.requested.store(true, Release);
        while self.is_running() {
            tokio::time::sleep(SETTLE).await;
        }
    }
}

/// name being written from a unit, assembled over several messages
#[derive(Clone, Debug, Default)]
pub(super) struct NameEdit {
    pub loco: u16,
    pub format: Format,
    pub name: [u8; super::NAME],
}

/**
    bus master: owns the unit table and schedules all bus traffic

    each [Self::step] first handles every block received so far, then performs one scheduled action: a keepalive poll of a unit slot, a discovery probe, or the status broadcast. The schedule visits live slots in order followed by discovery and the status broadcast. While discovery is below its top level it keeps the schedule to itself.
*/
pub struct Station<T, L, E=()> {
    pub(super) transport: T,
    pub(super) layout: L,
    pub(super) events: E,
    pub(super) config: Config,
    pub(super) table: DeviceTable,
    pub(super) discovery: Discovery,
    /// schedule position, a unit slot, [DISCOVERY] or [STATUS]
    pub(super) seq: u8,
    /// status broadcast round, 0..8
    pub(super) round: u8,
    /// pending loco database name write
    pub(super) edit: Option<NameEdit>,
}

impl<T: Transport, L: Layout, E: Events> Station<T, L, E> {
    pub fn new(transport: T, layout: L, events: E, config: Config) -> Self {
        Self {
            transport,
            layout,
            events,
            config,
            table: DeviceTable::new(),
            discovery: Discovery::new(),
            seq: DISCOVERY,
            round: 0,
            edit: None,
        }
    }
    pub fn transport(&self) -> &T {&self.transport}
    pub fn layout(&self) -> &L {&self.layout}
    pub fn layout_mut(&mut self) -> &mut L {&mut self.layout}
    pub fn events(&self) -> &E {&self.events}
    pub fn table(&self) -> &DeviceTable {&self.table}
    pub fn discovery(&self) -> &Discovery {&self.discovery}
    pub fn config(&self) -> &Config {&self.config}
    /// current schedule position
    pub fn seq(&self) -> u8 {self.seq}

    /// one iteration of the schedule
    pub async fn step(&mut self) {
        while let Some(block) = self.transport.try_recv_block() {
            self.dispatch(block).await;
        }
        match self.seq {
            DISCOVERY => self.probe().await,
            STATUS => self.broadcast_status().await,
            unit => self.poll(unit).await,
        }
        self.advance();
    }

    /// run the schedule until the stopper is triggered
    pub async fn run(&mut self, stopper: &Stopper) {
        stopper.running.store(true, Release);
        info!("bus master started");
        while !stopper.is_requested() {
            self.step().await;
            if self.preempted() {
                // one probe on the wire at a time, so echoes come back before the search moves far
                self.transport.flush().await;
                tokio::task::yield_now().await;
            }
            else
                {tokio::time::sleep(self.config.tick).await}
        }
        info!("bus master stopped");
        stopper.requested.store(false, Release);
        stopper.running.store(false, Release);
    }

    /// discovery keeps the schedule while it is searching below its top level
    fn preempted(&self) -> bool {
        self.seq == DISCOVERY && self.discovery.level() > 0
    }

    fn advance(&mut self) {
        if self.preempted()
            {return}
        loop {
            self.seq = if self.seq >= STATUS {0} else {self.seq + 1};
            if self.seq >= DISCOVERY || self.table.lookup(self.seq).is_alive()
                {break}
        }
    }

    async fn probe(&mut self) {
        let probe = self.discovery.probe();
        trace!("discovery probe {:?}", probe);
        self.send(Block::broadcast(codes::HP_PROBE, probe.to_data())).await;
    }

    async fn broadcast_status(&mut self) {
        let mut refresh = Refresh::from(0u8);
        refresh.set_round(u3::new(self.round));
        refresh.set_state(u4::new(self.layout.turnout_refresh(self.round) & 0xf));
        self.round = (self.round + 1) % 8;

        let mut data = [0; DATA];
        data[0] = self.layout.mode() as u8;
        data[1] = u8::from(refresh);
        self.send(Block::broadcast(codes::STATUS, data)).await;
    }

    async fn poll(&mut self, unit: u8) {
        let slot = *self.table.lookup(unit);
        if !slot.is_alive()
            {return}
        self.send(Block::unit(unit, codes::PING, [0; DATA])).await;
        if self.table.decay(unit) {
            // slots revived by traffic alone had no connect report either
            if !slot.assigned
                {debug!("unit {} without assigned address went silent", unit)}
            else {
                info!("unit {} with serial {:#08x} disconnected", unit, slot.serial);
                self.events.disconnected(unit, slot.serial);
            }
        }
    }

    /// queue a block, dropping it with a diagnostic when the transport is congested
    pub(super) async fn send(&self, block: Block) {
        if let Err(err) = self.transport.send_block(block, self.config.send_timeout).await {
            warn!("dropped {:?}: {}", block, err);
        }
    }

    /**
        update the firmware of the units listening to the bootloader stream

        the station must not be running. The transport is switched back to block mode whatever the outcome, the unit table is left untouched.
    */
    pub async fn update_firmware(&mut self, image: Image) -> Result<(), Error> {
        if image.is_empty()
            {return Err(Error::Master("firmware image is empty"))}
        info!("starting firmware update of {} chunks", image.len());
        self.transport.set_mode(Mode::BootStream).await;
        let result = Updater::new(&self.transport, &self.config).run(&image).await;
        self.transport.set_mode(Mode::Block).await;
        match &result {
            Ok(()) => info!("firmware update done"),
            Err(err) => warn!("firmware update aborted: {}", err),
        }
        result
    }
    /// same as [Self::update_firmware] with an image read from Intel HEX text
    pub async fn update_firmware_hex(&mut self, text: &str) -> Result<(), Error> {
        let image = Image::from_hex(text, self.config.max_chunks)?;
        self.update_firmware(image).await
    }
}
