//! Per-channel power negotiation and waveform playback.
//!
//! A [`Channel`] is shared between the API caller and the device's service
//! step.  Power scalars are plain atomics: one API writer (`set_power`) and
//! one notification updater (`update_confirmed`).  The waveform queue,
//! cursor and armed flag sit behind a single `std::sync::Mutex` which is
//! held only while they are mutated, never across a GATT write.

mod playback;

pub use playback::MAX_SEGMENTS;

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use heapless::String;
use log::{debug, info};

use crate::app::device::NAME_LEN;
use crate::error::{PowerRejected, WaveformError};
use crate::protocol::v2::V2Segment;
use crate::protocol::v3::V3Segment;
use crate::protocol::{SEGMENT_TICK_MS, Segment};
use crate::safety::PowerGuard;
use playback::Playback;

/// Callback receiving every device-confirmed power value.
pub type PowerListener = Box<dyn FnMut(u8) + Send>;

/// Default per-channel power ceiling before the device reports its own.
pub const DEFAULT_MAX_POWER: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    A,
    B,
}

/// How a power request treats the safety guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    /// Reject large jumps above the guard threshold.
    #[default]
    Safe,
    /// Skip the jump guard.  The max-power clamp still applies.
    Unsafe,
}

pub struct Channel<S: Segment> {
    name: String<NAME_LEN>,
    guard: PowerGuard,
    max_power: AtomicU8,
    requested: AtomicU8,
    confirmed: AtomicU8,
    sent: AtomicU8,
    safe_mode: AtomicBool,
    playback: Mutex<Playback<S>>,
    listener: Mutex<Option<PowerListener>>,
}

impl<S: Segment> Channel<S> {
    /// `device` and `label` are joined as `"<device>.<label>"`; the result
    /// is truncated if it does not fit.
    pub fn new(device: &str, label: &str, guard: PowerGuard, max_power: u8) -> Self {
        let mut name = String::new();
        for part in [device, ".", label] {
            for c in part.chars() {
                if name.push(c).is_err() {
                    break;
                }
            }
        }
        Self {
            name,
            guard,
            max_power: AtomicU8::new(max_power),
            requested: AtomicU8::new(0),
            confirmed: AtomicU8::new(0),
            sent: AtomicU8::new(0),
            safe_mode: AtomicBool::new(true),
            playback: Mutex::new(Playback::new()),
            listener: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Power ─────────────────────────────────────────────────────

    /// Request a new power level.  Values above the channel maximum are
    /// clamped.  In [`PowerMode::Safe`] large jumps are dropped, leaving the
    /// requested value unchanged.
    pub fn set_power(&self, value: u8, mode: PowerMode) -> Result<(), PowerRejected> {
        let max = self.max_power();
        let target = value.min(max);
        if target != value {
            info!("{}: clamping power {} to max {}", self.name, value, max);
        }

        self.safe_mode.store(mode == PowerMode::Safe, Ordering::Relaxed);
        if mode == PowerMode::Safe {
            let requested = self.requested_power();
            let confirmed = self.power();
            if let Err(e) = self.guard.check(requested, confirmed, target) {
                info!("{}: rejecting power setting: {}", self.name, e);
                return Err(e);
            }
        }

        self.requested.store(target, Ordering::Relaxed);
        Ok(())
    }

    /// Shift the requested power by `delta`, flooring at zero.
    pub fn increment_power(&self, delta: i16) -> Result<(), PowerRejected> {
        let next = i16::from(self.requested_power())
            .saturating_add(delta)
            .clamp(0, i16::from(u8::MAX));
        let result = self.set_power(next as u8, PowerMode::Safe);
        info!(
            "{}: incremented power by {}: {}",
            self.name,
            delta,
            self.requested_power()
        );
        result
    }

    /// Last value confirmed by the device.
    pub fn power(&self) -> u8 {
        self.confirmed.load(Ordering::Relaxed)
    }

    pub fn requested_power(&self) -> u8 {
        self.requested.load(Ordering::Relaxed)
    }

    /// Last value written to the device.
    pub fn sent_power(&self) -> u8 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn max_power(&self) -> u8 {
        self.max_power.load(Ordering::Relaxed)
    }

    /// Whether the most recent `set_power` went through the guard.
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Relaxed)
    }

    /// Install a listener for confirmed power values, replacing any previous.
    pub fn subscribe_power(&self, listener: PowerListener) {
        *lock(&self.listener) = Some(listener);
    }

    /// Set the ceiling, clamped to `hardware_max`.  Requested power above
    /// the new ceiling is pulled down to it.
    pub(crate) fn set_max_power(&self, limit: u8, hardware_max: u8) -> u8 {
        let limit = limit.min(hardware_max);
        self.max_power.store(limit, Ordering::Relaxed);
        if self.requested_power() > limit {
            self.requested.store(limit, Ordering::Relaxed);
        }
        limit
    }

    /// Record a device-confirmed power value and notify the listener.
    pub(crate) fn update_confirmed(&self, power: u8) {
        debug!(
            "{}: confirmed power {} (requested {})",
            self.name,
            power,
            self.requested_power()
        );
        if let Some(cb) = lock(&self.listener).as_mut() {
            cb(power);
        }
        self.confirmed.store(power, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, power: u8) {
        self.sent.store(power, Ordering::Relaxed);
    }

    /// `Some(requested)` while it differs from the confirmed value.
    pub(crate) fn pending_power(&self) -> Option<u8> {
        let requested = self.requested_power();
        (requested != self.power()).then_some(requested)
    }

    // ── Waveform ──────────────────────────────────────────────────

    /// Replace the waveform queue.  Playback restarts from the first
    /// segment on the next tick.  `power`, when given, is applied after the
    /// queue swap in safe mode.
    pub fn set_waveform(&self, segments: &[S], power: Option<u8>) -> Result<(), WaveformError> {
        self.load(segments.iter().copied(), power)
    }

    /// Arm playback.  `secs` is accepted for API compatibility; timed
    /// auto-stop is left to the caller.
    pub fn start(&self, _secs: u32) {
        if lock(&self.playback).arm() {
            debug!("{}: playback armed", self.name);
        }
    }

    /// Disarm playback, keeping the queue.  Takes effect on the next tick.
    pub fn stop(&self) {
        lock(&self.playback).disarm();
        debug!("{}: playback stopped", self.name);
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.playback).is_armed()
    }

    pub fn waveform_len(&self) -> usize {
        lock(&self.playback).len()
    }

    /// Advance playback one emission tick.  `None` when idle.
    pub fn next_segment(&self) -> Option<S> {
        lock(&self.playback).tick(SEGMENT_TICK_MS)
    }

    /// Next segment if playback was freshly (re)started since last asked.
    pub(crate) fn take_restart_segment(&self) -> Option<S> {
        let mut playback = lock(&self.playback);
        if playback.take_restart() {
            playback.tick(SEGMENT_TICK_MS)
        } else {
            None
        }
    }

    fn load<I>(&self, segments: I, power: Option<u8>) -> Result<(), WaveformError>
    where
        I: IntoIterator<Item = S>,
    {
        lock(&self.playback).replace(segments)?;
        if let Some(p) = power {
            // The rejection is already logged; the waveform stays loaded.
            let _ = self.set_power(p, PowerMode::Safe);
        }
        Ok(())
    }
}

impl Channel<V3Segment> {
    /// Load a V2-format waveform, converting each segment.
    pub fn set_v2_waveform(
        &self,
        segments: &[V2Segment],
        power: Option<u8>,
    ) -> Result<(), WaveformError> {
        self.load(segments.iter().copied().map(V3Segment::from), power)
    }
}

/// Lock, recovering from poison.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
