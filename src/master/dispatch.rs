use bilge::prelude::*;
use log::*;

use crate::{
    block::{Block, DATA, join14, split14},
    codes::{self, config, Accessory, CvHigh, Drive, Format, ModuleKind, OperatingMode},
    discovery::{Probe, Match, parts_of},
    };
use super::{
    Transport, Layout, Events, LocoEntry, LocoState,
    station::{Station, NameEdit, DISCOVERY},
    };


/// number of name characters carried by each name message
const PART: usize = 3;


impl<T: Transport, L: Layout, E: Events> Station<T, L, E> {
    /// handle one block received from the bus
    pub(super) async fn dispatch(&mut self, block: Block) {
        // units without an address can only answer discovery, using the broadcast address
        let unit = match block.unit_index() {
            Some(unit) => {
                self.table.touch(unit);
                unit
            },
            None if block.is_broadcast() => {
                if block.command == codes::HP_PROBE
                    {self.on_echo(&block.data).await}
                else
                    {debug!("ignored broadcast {:?}", block)}
                return
            },
            None => {
                debug!("ignored block with invalid address {:#04x}", block.address);
                return
            },
        };
        let data = &block.data;
        match block.command {
            codes::PING => {},
            codes::VERSION => {
                let version = self.config.version.reported();
                let [major, minor, patch] = version.to_data();
                self.send(Block::unit(unit, codes::VERSION, [major, minor, patch, 0, 0, 0])).await;
            },
            codes::MODE => match OperatingMode::try_from(data[0]) {
                Ok(mode) => {
                    info!("unit {} requests {:?} mode", unit, mode);
                    self.layout.set_mode(mode);
                },
                Err(mode) => debug!("unit {} requested unknown mode {}", unit, mode),
            },

            codes::LOCO_TAKE => self.on_take(unit, join14(data[0], data[1])).await,
            codes::LOCO_RELEASE => {
                let loco = join14(data[0], data[1]);
                if self.table.lookup(unit).controlled_loco == loco
                    {self.table.release(unit)}
                self.layout.release(loco);
            },
            codes::LOCO_SPEED => {
                let loco = join14(data[0], data[1]);
                if self.discard_stale(unit, loco)
                    {return}
                let drive = Drive::from(data[3]);
                self.layout.set_speed(loco, data[2] & 0x7f, drive.reverse(), drive.emergency());
                self.authoritative(unit, loco);
            },
            codes::LOCO_FUNC => {
                let loco = join14(data[0], data[1]);
                let group = data[2];
                if group > 3 {
                    debug!("unit {} sent unknown function group {}", unit, group);
                    return
                }
                if self.discard_stale(unit, loco)
                    {return}
                self.layout.set_functions(loco, group, data[3] & 0x7f);
                self.authoritative(unit, loco);
            },

            codes::TRACTION_COUPLE => {
                let first = join14(data[0], data[1]);
                let second = join14(data[2], data[3]);
                if self.layout.couple(first, second) {
                    debug!("coupled locos {} and {}", first, second);
                    self.send_loco(unit, second).await;
                }
                else {
                    self.send(Block::unit(unit, codes::LOCO_UNAVAILABLE, loco_data(second))).await;
                }
            },
            codes::TRACTION_CLEAR => {
                let loco = join14(data[0], data[1]);
                if self.layout.uncouple(loco)
                    {self.send_loco(unit, loco).await}
            },

            codes::TURNOUT => {
                let turnout = join14(data[0], data[1]);
                let accessory = Accessory::from(data[2] & 0x7f);
                self.layout.set_turnout(turnout, accessory.thrown(), accessory.on());
                self.send(Block::broadcast(codes::ACC_ACK, *data)).await;
            },

            codes::DB_SELECT ..= codes::DB_DELETE => self.on_browse(unit, block.command, join14(data[0], data[1])).await,
            codes::DB_DATA0 ..= codes::DB_DATA4 => self.on_name(unit, block.command, data),

            codes::HP_PROBE => self.on_echo(data).await,
            codes::HP_RESTART => {
                info!("unit {} restarts discovery", unit);
                self.discovery.reset();
                self.seq = DISCOVERY;
            },
            codes::HP_UNITINFO => {
                info!("unit {} has hardware revision {} software revision {}", unit, data[0], data[1]);
                self.table.set_revisions(unit, data[0], data[1]);
            },

            codes::CONFIG => {
                if let Some(reply) = self.configure(data)
                    {self.send(Block::unit(unit, codes::CONFIG, reply)).await}
            },
            codes::DEBUG => {
                let text = data.split(|&c| c == 0).next().unwrap_or_default();
                info!("unit {}: {}", unit, text.escape_ascii());
            },
            other => debug!("unit {} sent unknown command {:#04x}", unit, other),
        }
    }

    /// consume a blocked update, returning true if it must be ignored
    fn discard_stale(&mut self, unit: u8, loco: u16) -> bool {
        let discard = self.table.consume_blocked(unit);
        if discard {
            debug!("discarded stale update of loco {} from unit {}", loco, unit);
        }
        discard
    }
    /// an accepted change from a unit overrides echoes in flight from other controllers
    fn authoritative(&mut self, unit: u8, loco: u16) {
        self.table.take_control(unit, loco);
        self.table.block_others(loco, unit);
        self.events.loco_changed(loco);
    }

    async fn on_take(&mut self, unit: u8, loco: u16) {
        match self.layout.take_control(loco) {
            Some(state) => {
                debug!("unit {} takes loco {}", unit, loco);
                self.table.take_control(unit, loco);
                self.send_state(unit, loco, &state).await;
            },
            None => {
                debug!("loco {} unavailable for unit {}", loco, unit);
                self.send(Block::unit(unit, codes::LOCO_UNAVAILABLE, loco_data(loco))).await;
            },
        }
    }
    async fn send_loco(&mut self, unit: u8, loco: u16) {
        match self.layout.loco(loco) {
            Some(state) => self.send_state(unit, loco, &state).await,
            None => self.send(Block::unit(unit, codes::LOCO_UNAVAILABLE, loco_data(loco))).await,
        }
    }
    /// speed, functions and consist of a loco
    async fn send_state(&self, unit: u8, loco: u16, state: &LocoState) {
        let [high, low] = split14(loco);
        let mut drive = Drive::from(0u8);
        drive.set_reverse(state.reverse);
        drive.set_emergency(state.emergency);
        drive.set_consist(state.consist.is_some());
        drive.set_format(u3::new(state.format.to_byte()));
        let group = |n: u32| ((state.functions >> (7*n)) & 0x7f) as u8;

        self.send(Block::unit(unit, codes::LOCO_STATE,
            [high, low, state.speed & 0x7f, u8::from(drive), group(0), group(1)])).await;
        self.send(Block::unit(unit, codes::LOCO_FUNCTIONS,
            [high, low, group(2), group(3), 0, 0])).await;
        if let Some(partner) = state.consist {
            let [partner_high, partner_low] = split14(partner);
            self.send(Block::unit(unit, codes::LOCO_CONSIST,
                [high, low, partner_high, partner_low, 0, 0])).await;
        }
    }

    async fn on_browse(&mut self, unit: u8, command: u8, index: u16) {
        if command == codes::DB_DELETE && !self.layout.remove_entry(index) {
            debug!("unit {} could not delete loco entry {}", unit, index);
        }
        let count = self.layout.loco_count();
        if count == 0 {
            self.send(Block::unit(unit, codes::DB_EMPTY, [0; DATA])).await;
            return
        }
        let index = match command {
            codes::DB_NEXT => if index >= count {1} else {index + 1},
            codes::DB_PREV => if index <= 1 || index > count {count} else {index - 1},
            _ => index.clamp(1, count),
        };
        let Some(entry) = self.layout.loco_entry(index) else {
            debug!("loco entry {} of {} is missing", index, count);
            self.send(Block::unit(unit, codes::DB_EMPTY, [0; DATA])).await;
            return
        };
        let [index_high, index_low] = split14(index);
        let [loco_high, loco_low] = split14(entry.loco);
        self.send(Block::unit(unit, codes::DB_ENTRY,
            [index_high, index_low, loco_high, loco_low, entry.format.to_byte(), 0])).await;

        let mut name = [0u8; super::NAME];
        for (dst, src) in name.iter_mut().zip(entry.name.bytes()) {
            *dst = src & 0x7f;
        }
        for (part, chars) in name.chunks(PART).enumerate() {
            self.send(Block::unit(unit, codes::DB_NAME,
                [part as u8, chars[0], chars[1], chars[2], 0, 0])).await;
        }
    }

    /**
        accumulate a name written from a unit, committed on the last message

        the edit in progress is shared by all units, two units writing names at the same time corrupt each other
    */
    fn on_name(&mut self, unit: u8, command: u8, data: &[u8; DATA]) {
        if command == codes::DB_DATA0 {
            self.edit = Some(NameEdit {
                loco: join14(data[0], data[1]),
                format: Format::from_byte(data[2]),
                .. NameEdit::default()
                });
            return
        }
        let Some(edit) = self.edit.as_mut() else {
            debug!("unit {} sent name part without a loco", unit);
            return
        };
        let offset = usize::from(command - codes::DB_DATA0 - 1) * PART;
        for (dst, &src) in edit.name[offset .. offset + PART].iter_mut().zip(data) {
            *dst = src & 0x7f;
        }
        if command != codes::DB_DATA4
            {return}

        let Some(edit) = self.edit.take() else {return};
        let length = edit.name.iter().position(|&c| c == 0).unwrap_or(edit.name.len());
        // 7 bit characters are always valid utf8
        let text = core::str::from_utf8(&edit.name[.. length]).unwrap_or_default().trim_end();
        let mut entry = LocoEntry {loco: edit.loco, format: edit.format, .. LocoEntry::default()};
        entry.name.push_str(text).ok();
        info!("unit {} stores loco {} as {:?}", unit, entry.loco, entry.name);
        self.layout.store_entry(entry);
    }

    async fn on_echo(&mut self, data: &[u8; DATA]) {
        let Some(probe) = Probe::from_data(data) else {
            debug!("malformed discovery echo {:?}", data);
            return
        };
        match self.discovery.echo(probe) {
            Match::Ignored => debug!("late discovery echo {:?}", probe),
            Match::Descend => {
                trace!("discovery descends to level {}", self.discovery.level());
                self.seq = DISCOVERY;
            },
            Match::Found(serial) => self.assign(serial).await,
        }
    }

    /// give a slot to a discovered unit, the same slot as before if it was already known
    async fn assign(&mut self, serial: u32) {
        let Some(unit) = self.table.find_serial(serial).or_else(|| self.table.vacant()) else {
            warn!("no vacant slot for unit with serial {:#08x}", serial);
            return
        };
        self.table.assign(unit, serial);
        info!("unit with serial {:#08x} connected at slot {}", serial, unit);
        self.events.connected(unit, serial);
        let [p0, p1, p2, p3] = parts_of(serial);
        self.send(Block::unit(unit, codes::HP_SETUNITADR, [p0, p1, p2, p3, unit, 0])).await;
    }

    /// answer a configuration request, the reply starts with the request's sub opcode
    fn configure(&mut self, data: &[u8; DATA]) -> Option<[u8; DATA]> {
        let sub = data[0];
        let word = |i: usize| join14(data[i], data[i+1]);
        let mut reply = [0; DATA];
        reply[0] = sub;
        match sub {
            config::FLAGS_GET => {
                put14(&mut reply[1 ..], self.layout.flags());
            },
            config::FLAGS_SET => {
                let flags = self.layout.flags() | word(1);
                self.layout.set_flags(flags);
                put14(&mut reply[1 ..], self.layout.flags());
            },
            config::FLAGS_CLEAR => {
                let flags = self.layout.flags() & !word(1);
                self.layout.set_flags(flags);
                put14(&mut reply[1 ..], self.layout.flags());
            },
            config::MODULES_GET | config::MODULES_SET => {
                let kind = ModuleKind::try_from(data[1]).ok()?;
                if sub == config::MODULES_SET && !self.layout.set_modules(kind, data[2])
                    {debug!("module count of {:?} refused", kind)}
                reply[1] = data[1];
                reply[2] = self.layout.modules(kind) & 0x7f;
            },
            config::VOLTAGE_GET => put14(&mut reply[1 ..], self.layout.voltage()),
            config::VOLTAGE_SET => reply[1] = status(self.layout.set_voltage(word(1))),
            config::CURRENT_GET => put14(&mut reply[1 ..], self.layout.current()),
            config::CURRENT_SET => reply[1] = status(self.layout.set_current(word(1))),

            config::PT_READ_BYTE => {
                let value = self.layout.read_cv(word(1));
                reply[1 .. 3].copy_from_slice(&data[1 .. 3]);
                reply[3] = status(value.is_some());
                let [high, low] = split8(value.unwrap_or(0));
                reply[4] = high;
                reply[5] = low;
            },
            config::PT_WRITE_BYTE => {
                let value = join8(data[3], data[4]);
                reply[1 .. 3].copy_from_slice(&data[1 .. 3]);
                reply[3] = status(self.layout.write_cv(word(1), value));
            },
            config::PT_READ_BIT => {
                let value = self.layout.read_cv_bit(word(1), data[3] & 0x7);
                reply[1 .. 4].copy_from_slice(&data[1 .. 4]);
                reply[4] = status(value.is_some());
                reply[5] = u8::from(value.unwrap_or(false));
            },
            config::PT_WRITE_BIT => {
                let done = self.layout.write_cv_bit(word(1), data[3] & 0x7, data[4] != 0);
                reply[1 .. 4].copy_from_slice(&data[1 .. 4]);
                reply[4] = status(done);
            },
            config::PT_READ_ADDRESS => {
                let address = self.layout.read_address();
                reply[1] = status(address.is_some());
                put14(&mut reply[2 ..], address.unwrap_or(0));
            },
            config::POM_WRITE_BYTE => {
                let high = CvHigh::from(data[3]);
                let cv = (u16::from(high.cv().value()) << 7) | u16::from(data[4] & 0x7f);
                let value = (u8::from(high.msb()) << 7) | (data[5] & 0x7f);
                reply[1] = status(self.layout.pom_write(word(1), cv, value));
            },
            config::POM_WRITE_BIT => {
                let bit = data[5] & 0x7;
                let value = data[5] & 0x8 != 0;
                reply[1] = status(self.layout.pom_write_bit(word(1), word(3), bit, value));
            },
            config::MFX_ASSIGN => reply[1] = status(self.layout.mfx_assign(word(1))),
            config::FORMAT_GET => reply[1] = self.layout.format().to_byte(),
            config::FORMAT_SET => reply[1] = status(self.layout.set_format(Format::from_byte(data[1]))),
            other => {
                debug!("unknown configuration request {:#04x}", other);
                return None
            },
        }
        Some(reply)
    }
}


fn loco_data(loco: u16) -> [u8; DATA] {
    let [high, low] = split14(loco);
    [high, low, 0, 0, 0, 0]
}
fn put14(dst: &mut [u8], value: u16) {
    dst[.. 2].copy_from_slice(&split14(value));
}
fn status(done: bool) -> u8 {
    if done {config::OK} else {config::FAILED}
}
/// 8 bit value as its bit 7 then its 7 low bits
fn split8(value: u8) -> [u8; 2] {
    [value >> 7, value & 0x7f]
}
fn join8(high: u8, low: u8) -> u8 {
    ((high & 1) << 7) | (low & 0x7f)
}
