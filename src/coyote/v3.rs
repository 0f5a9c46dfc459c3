//! Coyote V3 engine.
//!
//! One B0 frame every 100 ms carries both channels' next four slots and,
//! at most, one power change.  A power change is tagged with a serial and
//! stays outstanding until the device answers with a B1 carrying the same
//! serial.  While one is outstanding no new serial is assigned.
//!
//! ```text
//!   bind ─▶ settle ─▶ B0 FF 00 00 (zero both, serial F) ─▶ BF balance
//!                          │
//!                          ▼
//!          ┌──────────── 100 ms loop ────────────┐
//!          │ outstanding? no  → tag pending power│
//!          │ fill 4 slots per channel            │
//!          │ write B0 (+ BF if balance changed)  │
//!          └─────────────────────────────────────┘
//! ```
//!
//! An ack with the wrong serial still clears the outstanding flag, so a
//! lost or garbled ack never wedges power control.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use super::{advance_deadline, require_characteristic, require_service, subscribe_battery};
use crate::app::device::DeviceLink;
use crate::app::ports::{CharacteristicRef, GattClient};
use crate::channel::{Channel, ChannelId};
use crate::config::SystemConfig;
use crate::error::{InitError, ProtocolAnomaly};
use crate::protocol::v3::{
    Balance, CHAR_BATTERY, CHAR_NOTIFY, CHAR_WRITE, MAX_POWER, PowerUpdate, Response,
    SERVICE_BATTERY, SERVICE_CONTROL, SLOTS, SerialCounter, Slot, V3Segment, encode_frame,
};
use crate::safety::PowerGuard;

/// Serial of the start-up zeroing frame.
const STARTUP_SERIAL: u8 = 0x0F;

/// State reachable from the notification callback.
struct Shared {
    a: Channel<V3Segment>,
    b: Channel<V3Segment>,
    /// Outstanding request serial; zero when none.
    pending: AtomicU8,
    report: Mutex<Option<Balance>>,
}

impl Shared {
    fn on_response(&self, data: &[u8]) {
        match Response::decode(data) {
            Ok(Response::PowerAck {
                serial,
                power_a,
                power_b,
            }) => {
                let expected = self.pending.load(Ordering::Relaxed);
                // Cleared either way so power control can continue.
                self.pending.store(0, Ordering::Relaxed);
                if serial != expected {
                    let anomaly = ProtocolAnomaly::SerialMismatch {
                        expected,
                        got: serial,
                    };
                    warn!("{}: {}", self.a.name(), anomaly);
                    return;
                }
                self.a.update_confirmed(power_a);
                self.b.update_confirmed(power_b);
            }
            Ok(Response::Report(balance)) => {
                info!(
                    "{}: max power {} {}  balance params {}/{} {}/{}",
                    self.a.name(),
                    balance.limit_a,
                    balance.limit_b,
                    balance.freq_balance_a,
                    balance.intensity_balance_a,
                    balance.freq_balance_b,
                    balance.intensity_balance_b
                );
                *self.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(balance);
            }
            Err(anomaly) => debug!("{}: {}", self.a.name(), anomaly),
        }
    }
}

pub struct CoyoteV3 {
    shared: Arc<Shared>,
    frame_period_ms: u64,
    settle_delay_ms: u64,
    balance: Balance,
    balance_dirty: bool,
    serial: SerialCounter,
    write: Option<CharacteristicRef>,
    next_deadline: Option<u64>,
    /// Start-up zeroing frame sent since the last bind.
    started: bool,
}

impl CoyoteV3 {
    pub fn new(device_name: &str, config: &SystemConfig) -> Self {
        let guard = PowerGuard::from_config(config);
        let max = config.default_max_power.min(MAX_POWER);
        Self {
            shared: Arc::new(Shared {
                a: Channel::new(device_name, "A", guard, max),
                b: Channel::new(device_name, "B", guard, max),
                pending: AtomicU8::new(0),
                report: Mutex::new(None),
            }),
            frame_period_ms: u64::from(config.v3_frame_period_ms),
            settle_delay_ms: u64::from(config.settle_delay_ms),
            balance: Balance {
                limit_a: MAX_POWER,
                limit_b: MAX_POWER,
                freq_balance_a: config.v3_freq_balance,
                freq_balance_b: config.v3_freq_balance,
                intensity_balance_a: config.v3_intensity_balance,
                intensity_balance_b: config.v3_intensity_balance,
            },
            balance_dirty: true,
            serial: SerialCounter::new(),
            write: None,
            next_deadline: None,
            started: false,
        }
    }

    pub fn channel_a(&self) -> &Channel<V3Segment> {
        &self.shared.a
    }

    pub fn channel_b(&self) -> &Channel<V3Segment> {
        &self.shared.b
    }

    /// Serial of the outstanding power request, if any.
    pub fn pending_serial(&self) -> Option<u8> {
        match self.shared.pending.load(Ordering::Relaxed) {
            0 => None,
            s => Some(s),
        }
    }

    /// Balance parameters as last reported by the device (BE).
    pub fn reported_balance(&self) -> Option<Balance> {
        *self
            .shared
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Balance parameters this host writes (BF).
    pub fn balance(&self) -> Balance {
        self.balance
    }

    /// Set both channel ceilings, clamped to 200.  The device soft limits
    /// follow on the next frame.
    pub fn set_max_power(&mut self, a: u8, b: u8) {
        self.balance.limit_a = self.shared.a.set_max_power(a, MAX_POWER);
        self.balance.limit_b = self.shared.b.set_max_power(b, MAX_POWER);
        self.balance_dirty = true;
        info!(
            "{}: max power A:{} B:{}",
            self.shared.a.name(),
            self.balance.limit_a,
            self.balance.limit_b
        );
    }

    /// Frequency and intensity balance of one channel.
    pub fn set_balance(&mut self, channel: ChannelId, freq_balance: u8, intensity_balance: u8) {
        match channel {
            ChannelId::A => {
                self.balance.freq_balance_a = freq_balance;
                self.balance.intensity_balance_a = intensity_balance;
            }
            ChannelId::B => {
                self.balance.freq_balance_b = freq_balance;
                self.balance.intensity_balance_b = intensity_balance;
            }
        }
        self.balance_dirty = true;
    }

    pub(crate) fn probe(
        &mut self,
        client: &dyn GattClient,
        link: &Arc<DeviceLink>,
    ) -> Result<(), InitError> {
        require_service(client, SERVICE_BATTERY)?;
        subscribe_battery(client, link, SERVICE_BATTERY, CHAR_BATTERY);

        require_service(client, SERVICE_CONTROL)?;
        let write = require_characteristic(client, SERVICE_CONTROL, CHAR_WRITE)?;
        let notify = require_characteristic(client, SERVICE_CONTROL, CHAR_NOTIFY)?;

        let shared = Arc::clone(&self.shared);
        client
            .subscribe(notify, Box::new(move |data: &[u8]| shared.on_response(data)))
            .map_err(|_| InitError::SubscribeFailed(CHAR_NOTIFY))?;

        self.write = Some(write);
        self.next_deadline = None;
        self.started = false;
        self.balance_dirty = true;
        self.shared.pending.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn unbind(&mut self) {
        self.write = None;
        self.next_deadline = None;
    }

    pub(crate) fn service(&mut self, client: &dyn GattClient, now_ms: u64) {
        let Some(write) = self.write else {
            return;
        };
        let deadline = *self
            .next_deadline
            .get_or_insert(now_ms + self.settle_delay_ms);
        if now_ms < deadline {
            return;
        }
        self.next_deadline = Some(advance_deadline(deadline, now_ms, self.frame_period_ms));

        if !self.started {
            self.started = true;
            self.shared.pending.store(STARTUP_SERIAL, Ordering::Relaxed);
            let frame = encode_frame(
                PowerUpdate::absolute(STARTUP_SERIAL, 0, 0),
                &[Slot::SILENT; SLOTS],
                &[Slot::SILENT; SLOTS],
            );
            self.send(client, write, &frame);
            self.send_balance(client, write);
            return;
        }

        let power = self.next_power_update();
        let slots_a = fill_slots(&self.shared.a);
        let slots_b = fill_slots(&self.shared.b);
        self.send(client, write, &encode_frame(power, &slots_a, &slots_b));
        if self.balance_dirty {
            self.send_balance(client, write);
        }
    }

    // ── Internal ──────────────────────────────────────────────────

    fn next_power_update(&mut self) -> PowerUpdate {
        if self.shared.pending.load(Ordering::Relaxed) != 0 {
            return PowerUpdate::NONE;
        }
        let (a, b) = (&self.shared.a, &self.shared.b);
        let (pa, pb) = (a.pending_power(), b.pending_power());
        if pa.is_none() && pb.is_none() {
            return PowerUpdate::NONE;
        }
        let serial = self.serial.next();
        // Tagged before the write so an early ack finds it.
        self.shared.pending.store(serial, Ordering::Relaxed);
        if let Some(p) = pa {
            a.record_sent(p);
        }
        if let Some(p) = pb {
            b.record_sent(p);
        }
        debug!(
            "{}: set power (serial {}) to A:{}->{:?}  B:{}->{:?}",
            a.name(),
            serial,
            a.power(),
            pa,
            b.power(),
            pb
        );
        PowerUpdate::new(serial, pa, pb)
    }

    fn send_balance(&mut self, client: &dyn GattClient, write: CharacteristicRef) {
        self.balance_dirty = false;
        self.send(client, write, &self.balance.encode());
    }

    fn send(&self, client: &dyn GattClient, write: CharacteristicRef, data: &[u8]) {
        if let Err(e) = client.write(write, data) {
            warn!("{}: frame write failed: {}", self.shared.a.name(), e);
        }
    }
}

fn fill_slots(ch: &Channel<V3Segment>) -> [Slot; SLOTS] {
    let mut slots = [Slot::SILENT; SLOTS];
    for slot in &mut slots {
        if let Some(seg) = ch.next_segment() {
            *slot = seg.slot();
        }
    }
    slots
}
