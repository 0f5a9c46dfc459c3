//! Coyote V2 engine.
//!
//! Each 100 ms cycle is split into two 50 ms sub-ticks:
//!
//! ```text
//!   sub-tick 0   restart segment (if a waveform was just loaded/armed)
//!                power write     (every Nth cycle, if requested ≠ confirmed)
//!   sub-tick 1   regular segment for every armed channel
//! ```
//!
//! A freshly started waveform therefore plays its first segment at t=0 and
//! the following ones at t=50, 150, 250 ...
//! Confirmed power arrives through the 0x1504 notification.

use core::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use super::{advance_deadline, require_characteristic, require_service, subscribe_battery};
use crate::app::device::DeviceLink;
use crate::app::ports::{CharacteristicRef, GattClient};
use crate::channel::Channel;
use crate::config::SystemConfig;
use crate::error::InitError;
use crate::protocol::v2::{
    CHAR_BATTERY, CHAR_CONFIG, CHAR_FIRMWARE, CHAR_POWER, CHAR_WAVE_A, CHAR_WAVE_B, PowerConfig,
    SERVICE_DEVICE_INFO, SERVICE_POWER, V2Segment, decode_firmware, decode_power, encode_power,
};
use crate::safety::PowerGuard;

/// State reachable from the power notification callback.
struct Shared {
    a: Channel<V2Segment>,
    b: Channel<V2Segment>,
    /// Device units per power level; zero until probed.
    step: AtomicU16,
}

impl Shared {
    fn on_power_notify(&self, data: &[u8]) {
        let step = self.step.load(Ordering::Relaxed);
        let Some((a_raw, b_raw)) = decode_power(data) else {
            warn!("{}: short power notification ({} bytes)", self.a.name(), data.len());
            return;
        };
        if step == 0 {
            return;
        }
        self.a.update_confirmed((a_raw / step).min(255) as u8);
        self.b.update_confirmed((b_raw / step).min(255) as u8);
    }
}

#[derive(Clone, Copy)]
struct Bound {
    power: CharacteristicRef,
    wave_a: CharacteristicRef,
    wave_b: CharacteristicRef,
}

pub struct CoyoteV2 {
    shared: Arc<Shared>,
    sub_tick_ms: u64,
    power_interval_cycles: u32,
    settle_delay_ms: u64,
    hardware_max: u8,
    firmware: Option<(u8, u8)>,
    bound: Option<Bound>,
    next_deadline: Option<u64>,
    sub_tick: u8,
    cycle: u32,
}

impl CoyoteV2 {
    pub fn new(device_name: &str, config: &SystemConfig) -> Self {
        let guard = PowerGuard::from_config(config);
        Self {
            shared: Arc::new(Shared {
                a: Channel::new(device_name, "A", guard, config.default_max_power),
                b: Channel::new(device_name, "B", guard, config.default_max_power),
                step: AtomicU16::new(0),
            }),
            sub_tick_ms: u64::from(config.v2_sub_tick_ms),
            power_interval_cycles: config.v2_power_interval_cycles.max(1),
            settle_delay_ms: u64::from(config.settle_delay_ms),
            hardware_max: u8::MAX,
            firmware: None,
            bound: None,
            next_deadline: None,
            sub_tick: 0,
            cycle: 0,
        }
    }

    pub fn channel_a(&self) -> &Channel<V2Segment> {
        &self.shared.a
    }

    pub fn channel_b(&self) -> &Channel<V2Segment> {
        &self.shared.b
    }

    /// Device units per power level, once probed.
    pub fn step(&self) -> Option<u16> {
        match self.shared.step.load(Ordering::Relaxed) {
            0 => None,
            s => Some(s),
        }
    }

    /// Power ceiling reported by the device.
    pub fn hardware_max(&self) -> u8 {
        self.hardware_max
    }

    pub fn firmware(&self) -> Option<(u8, u8)> {
        self.firmware
    }

    /// Set both channel ceilings, clamped to the hardware maximum.
    pub fn set_max_power(&mut self, a: u8, b: u8) {
        let a = self.shared.a.set_max_power(a, self.hardware_max);
        let b = self.shared.b.set_max_power(b, self.hardware_max);
        info!("{}: max power A:{} B:{}", self.shared.a.name(), a, b);
    }

    pub(crate) fn probe(
        &mut self,
        client: &dyn GattClient,
        link: &Arc<DeviceLink>,
    ) -> Result<(), InitError> {
        require_service(client, SERVICE_DEVICE_INFO)?;
        if let Some(ch) = client.find_characteristic(SERVICE_DEVICE_INFO, CHAR_FIRMWARE) {
            match client.read(ch).map(|v| decode_firmware(&v)) {
                Ok(Some((major, minor))) => {
                    info!("{}: firmware {:02x}.{:02x}", link.name(), major, minor);
                    self.firmware = Some((major, minor));
                }
                Ok(None) => warn!("{}: short firmware value", link.name()),
                Err(e) => warn!("{}: firmware read failed: {}", link.name(), e),
            }
        }
        subscribe_battery(client, link, SERVICE_DEVICE_INFO, CHAR_BATTERY);

        require_service(client, SERVICE_POWER)?;
        let config = require_characteristic(client, SERVICE_POWER, CHAR_CONFIG)?;
        let power = require_characteristic(client, SERVICE_POWER, CHAR_POWER)?;
        let wave_a = require_characteristic(client, SERVICE_POWER, CHAR_WAVE_A)?;
        let wave_b = require_characteristic(client, SERVICE_POWER, CHAR_WAVE_B)?;

        let raw = client
            .read(config)
            .map_err(|_| InitError::ReadFailed(CHAR_CONFIG))?;
        let cfg = PowerConfig::decode(&raw).ok_or(InitError::InvalidConfig("short power config"))?;
        let max = cfg
            .max_level()
            .ok_or(InitError::InvalidConfig("zero power step"))?;
        info!(
            "{}: power = {} / {} -> {}",
            link.name(),
            cfg.max_raw,
            cfg.step,
            max
        );
        self.shared.step.store(cfg.step, Ordering::Relaxed);
        self.hardware_max = max;
        for ch in [&self.shared.a, &self.shared.b] {
            ch.set_max_power(ch.max_power(), max);
        }

        let shared = Arc::clone(&self.shared);
        client
            .subscribe(power, Box::new(move |data: &[u8]| shared.on_power_notify(data)))
            .map_err(|_| InitError::SubscribeFailed(CHAR_POWER))?;

        self.bound = Some(Bound {
            power,
            wave_a,
            wave_b,
        });
        self.next_deadline = None;
        self.sub_tick = 0;
        self.cycle = 0;
        Ok(())
    }

    pub(crate) fn unbind(&mut self) {
        self.bound = None;
        self.next_deadline = None;
    }

    pub(crate) fn service(&mut self, client: &dyn GattClient, now_ms: u64) {
        let Some(bound) = self.bound else {
            return;
        };
        let deadline = *self
            .next_deadline
            .get_or_insert(now_ms + self.settle_delay_ms);
        if now_ms < deadline {
            return;
        }
        self.next_deadline = Some(advance_deadline(deadline, now_ms, self.sub_tick_ms));

        if self.sub_tick == 0 {
            self.restart_segments(client, bound);
            if self.cycle % self.power_interval_cycles == 0 {
                self.write_power(client, bound);
            }
            self.cycle = self.cycle.wrapping_add(1);
            self.sub_tick = 1;
        } else {
            self.regular_segments(client, bound);
            self.sub_tick = 0;
        }
    }

    // ── Internal ──────────────────────────────────────────────────

    fn channels(&self, bound: Bound) -> [(&Channel<V2Segment>, CharacteristicRef); 2] {
        [(&self.shared.a, bound.wave_a), (&self.shared.b, bound.wave_b)]
    }

    fn restart_segments(&self, client: &dyn GattClient, bound: Bound) {
        for (ch, wave) in self.channels(bound) {
            if let Some(seg) = ch.take_restart_segment() {
                write_segment(client, ch, wave, seg);
            }
        }
    }

    fn regular_segments(&self, client: &dyn GattClient, bound: Bound) {
        for (ch, wave) in self.channels(bound) {
            if let Some(seg) = ch.next_segment() {
                write_segment(client, ch, wave, seg);
            }
        }
    }

    fn write_power(&self, client: &dyn GattClient, bound: Bound) {
        let (a, b) = (&self.shared.a, &self.shared.b);
        if a.pending_power().is_none() && b.pending_power().is_none() {
            return;
        }
        let step = self.shared.step.load(Ordering::Relaxed);
        let (pa, pb) = (a.requested_power(), b.requested_power());
        info!(
            "{}: set power to A:{}->{}  B:{}->{}",
            a.name(),
            a.power(),
            pa,
            b.power(),
            pb
        );
        let value = encode_power(u16::from(pa) * step, u16::from(pb) * step);
        match client.write(bound.power, &value) {
            Ok(()) => {
                a.record_sent(pa);
                b.record_sent(pb);
            }
            Err(e) => warn!("{}: power write failed: {}", a.name(), e),
        }
    }
}

fn write_segment(
    client: &dyn GattClient,
    ch: &Channel<V2Segment>,
    wave: CharacteristicRef,
    seg: V2Segment,
) {
    debug!(
        "{}: segment x={} y={} z={}",
        ch.name(),
        seg.x(),
        seg.y(),
        seg.z()
    );
    if let Err(e) = client.write(wave, &seg.encode()) {
        warn!("{}: segment write failed: {}", ch.name(), e);
    }
}
