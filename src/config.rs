//! System configuration parameters
//!
//! Timing and safety tunables for the Coyote link.  Loadable from JSON
//! (host tools, desk simulation) or from a compact postcard blob (flash).

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Lifecycle ---
    /// Upper bound on one connect attempt (milliseconds)
    pub connect_timeout_ms: u32,
    /// Delay between the first service call and the first frame (milliseconds)
    pub settle_delay_ms: u32,

    // --- Scheduler ---
    /// Period of the background service driver (milliseconds)
    pub scheduler_period_ms: u32,

    // --- V2 cadence ---
    /// V2 sub-tick length; two sub-ticks make one segment cycle (milliseconds)
    pub v2_sub_tick_ms: u32,
    /// Power is written at most once every this many 100 ms cycles
    pub v2_power_interval_cycles: u32,

    // --- V3 cadence ---
    /// B0 frame period (milliseconds)
    pub v3_frame_period_ms: u32,
    /// Frequency balance written in the BF frame (0-255)
    pub v3_freq_balance: u8,
    /// Intensity balance written in the BF frame (0-255)
    pub v3_intensity_balance: u8,

    // --- Safety ---
    /// Channel power ceiling until changed by the caller
    pub default_max_power: u8,
    /// Above this power, large steps are refused in safe mode
    pub safe_power_threshold: u8,
    /// Largest single step allowed above the threshold
    pub safe_power_max_jump: u8,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Lifecycle
            connect_timeout_ms: 10_000,
            settle_delay_ms: 1_000,

            // Scheduler
            scheduler_period_ms: 10,

            // V2
            v2_sub_tick_ms: 50,
            v2_power_interval_cycles: 10, // ~1 s

            // V3
            v3_frame_period_ms: 100,
            v3_freq_balance: 32,
            v3_intensity_balance: 32,

            // Safety
            default_max_power: 100,
            safe_power_threshold: 50,
            safe_power_max_jump: 10,
        }
    }
}

impl SystemConfig {
    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be non-zero"));
        }
        if self.v2_sub_tick_ms == 0 || self.v3_frame_period_ms == 0 {
            return Err(Error::Config("frame periods must be non-zero"));
        }
        if self.v2_power_interval_cycles == 0 {
            return Err(Error::Config("v2_power_interval_cycles must be non-zero"));
        }
        if self.scheduler_period_ms == 0
            || self.scheduler_period_ms > self.v2_sub_tick_ms
            || self.scheduler_period_ms > self.v3_frame_period_ms
        {
            return Err(Error::Config(
                "scheduler_period_ms must be non-zero and no longer than a frame period",
            ));
        }
        if self.default_max_power == 0 {
            return Err(Error::Config("default_max_power must be non-zero"));
        }
        if self.safe_power_max_jump == 0 {
            return Err(Error::Config("safe_power_max_jump must be non-zero"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.  Missing fields take defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing config JSON")?;
        config.validate().context("validating config")?;
        Ok(config)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("serialising config JSON")
    }

    /// Decode and validate a postcard blob.
    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("corrupt config blob"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("config serialisation failed"))
    }
}
