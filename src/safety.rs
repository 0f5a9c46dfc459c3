//! Power safety guard.
//!
//! Every power request passes through [`PowerGuard::check`] unless the
//! caller explicitly opts out.  Above a threshold, the guard refuses any
//! single step larger than `max_jump` relative to **both** the value last
//! requested and the value the device last confirmed:
//!
//! ```text
//!   target ≤ threshold              → allowed
//!   target > requested + max_jump   → JumpFromRequested
//!   target > confirmed + max_jump   → JumpFromConfirmed
//! ```
//!
//! Decreases are never refused.  A caller ramping up past the threshold
//! must do so in steps, and each step must be confirmed by the device
//! before the next one lands more than `max_jump` above it.

use crate::config::SystemConfig;
use crate::error::PowerRejected;

/// Stateless jump limiter shared by every channel of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerGuard {
    threshold: u8,
    max_jump: u8,
}

impl Default for PowerGuard {
    fn default() -> Self {
        Self::new(50, 10)
    }
}

impl PowerGuard {
    pub const fn new(threshold: u8, max_jump: u8) -> Self {
        Self {
            threshold,
            max_jump,
        }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(config.safe_power_threshold, config.safe_power_max_jump)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn max_jump(&self) -> u8 {
        self.max_jump
    }

    /// Evaluate a request to move to `target`.
    pub fn check(&self, requested: u8, confirmed: u8, target: u8) -> Result<(), PowerRejected> {
        if target <= self.threshold {
            return Ok(());
        }
        // ── Against the last request ──────────────────────────────
        if u16::from(target) > u16::from(requested) + u16::from(self.max_jump) {
            return Err(PowerRejected::JumpFromRequested {
                from: requested,
                to: target,
            });
        }
        // ── Against what the device reports ───────────────────────
        if u16::from(target) > u16::from(confirmed) + u16::from(self.max_jump) {
            return Err(PowerRejected::JumpFromConfirmed {
                from: confirmed,
                to: target,
            });
        }
        Ok(())
    }
}
