//! Coyote V2 wire format.
//!
//! Three packed little-endian structures travel over the V2 power-generator
//! service.  Field widths are fixed by the peripheral firmware:
//!
//! ```text
//! Segment (channel A = 0x1506, channel B = 0x1505), 3 bytes LE:
//!   bits  0..=4   X  (5 bits)   pulse count
//!   bits  5..=14  Y  (10 bits)  pulse gap
//!   bits 15..=19  Z  (5 bits)   pulse width
//!   bits 20..=23  reserved (zero)
//!
//! Power (0x1504), 3 bytes LE, device units (= power × step):
//!   bits  0..=10  channel B
//!   bits 11..=21  channel A
//!
//! Power config (0x1507), LE:
//!   bits  0..=7   step
//!   bits  8..=18  max power (device units)
//! ```

use super::{Segment, Uuid};

// ───────────────────────────────────────────────────────────────
// GATT layout
// ───────────────────────────────────────────────────────────────

/// Advertised peer name of a V2 unit.
pub const PEER_NAME: &str = "D-LAB ESTIM01";

pub const SERVICE_DEVICE_INFO: Uuid = 0x955A_180A_0FE2_F5AA_A094_84B8_D4F3_E8AD;
pub const CHAR_BATTERY: Uuid = 0x955A_1500_0FE2_F5AA_A094_84B8_D4F3_E8AD;
pub const CHAR_FIRMWARE: Uuid = 0x955A_1501_0FE2_F5AA_A094_84B8_D4F3_E8AD;

pub const SERVICE_POWER: Uuid = 0x955A_180B_0FE2_F5AA_A094_84B8_D4F3_E8AD;
pub const CHAR_POWER: Uuid = 0x955A_1504_0FE2_F5AA_A094_84B8_D4F3_E8AD;
pub const CHAR_WAVE_B: Uuid = 0x955A_1505_0FE2_F5AA_A094_84B8_D4F3_E8AD;
pub const CHAR_WAVE_A: Uuid = 0x955A_1506_0FE2_F5AA_A094_84B8_D4F3_E8AD;
pub const CHAR_CONFIG: Uuid = 0x955A_1507_0FE2_F5AA_A094_84B8_D4F3_E8AD;

/// Lower bound on a V2 segment's duration.
pub const MIN_DURATION_MS: u32 = 10;

const X_MASK: u32 = 0x1F;
const Y_MASK: u32 = 0x3FF;
const Z_MASK: u32 = 0x1F;
const POWER_MASK: u32 = 0x7FF;

// ───────────────────────────────────────────────────────────────
// Segment
// ───────────────────────────────────────────────────────────────

/// One V2 waveform segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Segment {
    x: u8,
    y: u16,
    z: u8,
    repeat: u16,
}

impl V2Segment {
    /// Build a segment; each field is truncated to its wire width.
    pub const fn new(x: u8, y: u16, z: u8, repeat: u16) -> Self {
        Self {
            x: x & X_MASK as u8,
            y: y & Y_MASK as u16,
            z: z & Z_MASK as u8,
            repeat,
        }
    }

    /// Build a segment from snooped bytes, in transmit order.
    pub const fn from_bytes(bytes: [u8; 3], repeat: u16) -> Self {
        let raw = bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16;
        Self {
            x: (raw & X_MASK) as u8,
            y: ((raw >> 5) & Y_MASK) as u16,
            z: ((raw >> 15) & Z_MASK) as u8,
            repeat,
        }
    }

    /// Packed 3-byte wire encoding.
    pub const fn encode(&self) -> [u8; 3] {
        let raw = self.x as u32 | (self.y as u32) << 5 | (self.z as u32) << 15;
        let b = raw.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    pub const fn x(&self) -> u8 {
        self.x
    }

    pub const fn y(&self) -> u16 {
        self.y
    }

    pub const fn z(&self) -> u8 {
        self.z
    }
}

impl Segment for V2Segment {
    /// `X + Y`, floored at [`MIN_DURATION_MS`].
    fn duration_ms(&self) -> u32 {
        (u32::from(self.x) + u32::from(self.y)).max(MIN_DURATION_MS)
    }

    fn repeat(&self) -> u16 {
        self.repeat
    }
}

// ───────────────────────────────────────────────────────────────
// Power / config values
// ───────────────────────────────────────────────────────────────

/// Pack absolute A/B power, in device units, into the 0x1504 layout.
pub fn encode_power(a_raw: u16, b_raw: u16) -> [u8; 3] {
    let raw = (u32::from(b_raw) & POWER_MASK) | (u32::from(a_raw) & POWER_MASK) << 11;
    let b = raw.to_le_bytes();
    [b[0], b[1], b[2]]
}

/// Unpack a 0x1504 value into `(a_raw, b_raw)` device units.
pub fn decode_power(data: &[u8]) -> Option<(u16, u16)> {
    let [b0, b1, b2, ..] = *data else {
        return None;
    };
    let raw = u32::from_le_bytes([b0, b1, b2, 0]);
    Some((((raw >> 11) & POWER_MASK) as u16, (raw & POWER_MASK) as u16))
}

/// Decoded 0x1507 power configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerConfig {
    /// Device units per user-visible power level.
    pub step: u16,
    /// Maximum power in device units.
    pub max_raw: u16,
}

impl PowerConfig {
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }
        let mut word = [0u8; 4];
        let n = data.len().min(4);
        word[..n].copy_from_slice(&data[..n]);
        let raw = u32::from_le_bytes(word);
        Some(Self {
            step: (raw & 0xFF) as u16,
            max_raw: ((raw >> 8) & POWER_MASK) as u16,
        })
    }

    /// Hardware power limit in user-visible levels, saturated to `u8`.
    /// `None` when `step` is zero.
    pub fn max_level(&self) -> Option<u8> {
        if self.step == 0 {
            return None;
        }
        Some((self.max_raw / self.step).min(u16::from(u8::MAX)) as u8)
    }
}

/// Firmware version `(major, minor)` from the 0x1501 value.
pub fn decode_firmware(data: &[u8]) -> Option<(u8, u8)> {
    match data {
        [lo, hi, ..] => Some((*lo, *hi)),
        _ => None,
    }
}

// ───────────────────────────────────────────────────────────────
// Presets
// ───────────────────────────────────────────────────────────────

/// Waveforms captured from the vendor app, plus a few hand-tuned ones.
pub mod presets {
    use super::V2Segment;

    const fn s(x: u8, y: u16, z: u8) -> V2Segment {
        V2Segment::new(x, y, z, 1)
    }

    const fn snoop(b: [u8; 3]) -> V2Segment {
        V2Segment::from_bytes(b, 1)
    }

    pub const GRAIN_TOUCH: &[V2Segment] = &[
        snoop([0xE1, 0x03, 0x00]),
        snoop([0xE1, 0x03, 0x0A]),
        snoop([0xA1, 0x04, 0x0A]),
        snoop([0xC1, 0x05, 0x0A]),
        snoop([0x01, 0x07, 0x00]),
        snoop([0x21, 0x01, 0x0A]),
        snoop([0x61, 0x01, 0x0A]),
        snoop([0xA1, 0x01, 0x0A]),
        snoop([0x01, 0x02, 0x00]),
        snoop([0x01, 0x02, 0x0A]),
        snoop([0x81, 0x02, 0x0A]),
        snoop([0x21, 0x03, 0x0A]),
    ];

    /// High-frequency carrier for audio-modulated use.
    pub const AUDIO_BASE: &[V2Segment] = &[s(1, 9, 16)];

    pub const INTENSE_VIBRATION: &[V2Segment] = &[s(1, 9, 22)];

    pub const SLOW_WAVE: &[V2Segment] = &[
        V2Segment::new(1, 26, 8, 2),
        s(1, 24, 10),
        s(1, 22, 12),
        s(1, 20, 14),
        s(1, 18, 16),
        s(1, 16, 18),
        s(1, 16, 22),
        s(1, 16, 24),
        V2Segment::new(1, 12, 24, 2),
        s(1, 16, 24),
        s(1, 16, 22),
        s(1, 16, 18),
        s(1, 18, 16),
        s(1, 20, 14),
        s(1, 22, 12),
        s(1, 24, 10),
    ];

    pub const MEDIUM_WAVE: &[V2Segment] = &[
        V2Segment::new(1, 9, 4, 2),
        s(1, 9, 6),
        s(1, 9, 10),
        s(1, 9, 12),
        s(1, 9, 17),
        V2Segment::new(1, 9, 20, 5),
        s(1, 9, 20),
        s(1, 9, 17),
        s(1, 9, 12),
        s(1, 9, 10),
        s(1, 9, 6),
    ];
}
