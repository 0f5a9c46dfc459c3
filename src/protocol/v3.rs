//! Coyote V3 wire format.
//!
//! All traffic goes through one write characteristic (0x150A) and one
//! notify characteristic (0x150B) on service 0x180C.
//!
//! ```text
//! B0 frame (host → device), 20 bytes, sent every 100 ms:
//!   [0]      0xB0
//!   [1]      serial << 4 | mode      mode bits 3:2 = A, 1:0 = B
//!   [2]      absolute power A        0..=200
//!   [3]      absolute power B
//!   [4..8]   frequency A   × 4 slots (25 ms each)
//!   [8..12]  intensity A   × 4 slots
//!   [12..16] frequency B   × 4 slots
//!   [16..20] intensity B   × 4 slots
//!
//! BF frame (host → device), 7 bytes:
//!   0xBF, limit A, limit B, freq-balance A, freq-balance B,
//!         intensity-balance A, intensity-balance B
//!
//! B1 ack (device → host):  0xB1, serial, power A, power B
//! BE report (device → host): same layout as BF, header 0xBE
//! ```

use super::v2::V2Segment;
use super::{Segment, Uuid, uuid16};
use crate::error::ProtocolAnomaly;

// ───────────────────────────────────────────────────────────────
// GATT layout
// ───────────────────────────────────────────────────────────────

/// Advertised peer name of a V3 unit.
pub const PEER_NAME: &str = "47L121000";

pub const SERVICE_BATTERY: Uuid = uuid16(0x180A);
pub const CHAR_BATTERY: Uuid = uuid16(0x1500);
pub const SERVICE_CONTROL: Uuid = uuid16(0x180C);
pub const CHAR_WRITE: Uuid = uuid16(0x150A);
pub const CHAR_NOTIFY: Uuid = uuid16(0x150B);

/// Hardware power ceiling.
pub const MAX_POWER: u8 = 200;

pub const FRAME_LEN: usize = 20;
pub const BALANCE_FRAME_LEN: usize = 7;

/// Slots per channel per frame.
pub const SLOTS: usize = 4;

const HDR_FRAME: u8 = 0xB0;
const HDR_ACK: u8 = 0xB1;
const HDR_REPORT: u8 = 0xBE;
const HDR_BALANCE: u8 = 0xBF;

/// Mode nibble: absolute set of A (bits 3:2 = 0b11).
pub const MODE_SET_A: u8 = 0b1100;
/// Mode nibble: absolute set of B (bits 1:0 = 0b11).
pub const MODE_SET_B: u8 = 0b0011;

pub const FREQ_MIN: u8 = 10;
pub const FREQ_MAX: u8 = 240;
pub const INTENSITY_MAX: u8 = 100;

// ───────────────────────────────────────────────────────────────
// Segment
// ───────────────────────────────────────────────────────────────

/// One V3 waveform segment.  Parameters are clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V3Segment {
    freq: u8,
    intensity: u8,
    repeat: u16,
}

impl V3Segment {
    pub const fn new(freq: u8, intensity: u8, repeat: u16) -> Self {
        let freq = if freq < FREQ_MIN {
            FREQ_MIN
        } else if freq > FREQ_MAX {
            FREQ_MAX
        } else {
            freq
        };
        let intensity = if intensity > INTENSITY_MAX {
            INTENSITY_MAX
        } else {
            intensity
        };
        let repeat = if repeat == 0 { 1 } else { repeat };
        Self {
            freq,
            intensity,
            repeat,
        }
    }

    pub const fn freq(&self) -> u8 {
        self.freq
    }

    pub const fn intensity(&self) -> u8 {
        self.intensity
    }

    /// Wire value for one 25 ms slot.
    pub const fn slot(&self) -> Slot {
        Slot {
            freq: self.freq,
            intensity: self.intensity,
        }
    }
}

impl Segment for V3Segment {
    fn duration_ms(&self) -> u32 {
        freq_to_duration_ms(self.freq)
    }

    fn repeat(&self) -> u16 {
        self.repeat
    }
}

/// Frequency byte → pulse period in milliseconds.
///
/// ```text
///   v ≤ 100        v
///   v ≤ 200        (v − 100) × 5 + 100
///   v ≤ 240        (v − 200) × 10 + 600
///   otherwise      1000
/// ```
pub const fn freq_to_duration_ms(v: u8) -> u32 {
    let v = v as u32;
    if v <= 100 {
        v
    } else if v <= 200 {
        (v - 100) * 5 + 100
    } else if v <= 240 {
        (v - 200) * 10 + 600
    } else {
        1000
    }
}

/// V2 `X + Y` period → V3 frequency byte.
pub const fn v2_period_to_freq(xy: u32) -> u8 {
    if xy <= 10 {
        10
    } else if xy <= 100 {
        xy as u8
    } else if xy <= 600 {
        ((xy - 100) / 5 + 100) as u8
    } else if xy <= 1000 {
        ((xy - 600) / 10 + 200) as u8
    } else {
        240
    }
}

impl From<V2Segment> for V3Segment {
    /// V2 segments play a single 100 ms pulse per repeat; V3 fills four
    /// 25 ms slots, so the repeat count scales by the slot count.
    fn from(s: V2Segment) -> Self {
        let xy = u32::from(s.x()) + u32::from(s.y());
        let intensity = (u16::from(s.z()) * 5).min(INTENSITY_MAX as u16) as u8;
        let repeat = s.repeat().max(1).saturating_mul(SLOTS as u16);
        Self::new(v2_period_to_freq(xy), intensity, repeat)
    }
}

// ───────────────────────────────────────────────────────────────
// B0 frame
// ───────────────────────────────────────────────────────────────

/// One 25 ms output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub freq: u8,
    pub intensity: u8,
}

impl Slot {
    /// Signals "no active segment" to the device.
    pub const SILENT: Self = Self {
        freq: 0xFF,
        intensity: 0xFF,
    };
}

/// Power section of a B0 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerUpdate {
    /// Serial 1..=15, or 0 when nothing is requested.
    pub serial: u8,
    pub mode: u8,
    pub power_a: u8,
    pub power_b: u8,
}

impl PowerUpdate {
    /// No power change: mode nibble and powers are zero.
    pub const NONE: Self = Self {
        serial: 0,
        mode: 0,
        power_a: 0,
        power_b: 0,
    };

    /// Absolute set of the channels that carry a value.  A channel
    /// passed as `None` keeps mode `0b00` and a zero power byte.
    pub const fn new(serial: u8, a: Option<u8>, b: Option<u8>) -> Self {
        let mut update = Self {
            serial,
            mode: 0,
            power_a: 0,
            power_b: 0,
        };
        if let Some(p) = a {
            update.mode |= MODE_SET_A;
            update.power_a = p;
        }
        if let Some(p) = b {
            update.mode |= MODE_SET_B;
            update.power_b = p;
        }
        update
    }

    /// Absolute set of both channels.
    pub const fn absolute(serial: u8, power_a: u8, power_b: u8) -> Self {
        Self::new(serial, Some(power_a), Some(power_b))
    }

    pub const fn is_change(&self) -> bool {
        self.mode != 0
    }
}

/// Encode a B0 frame.
pub fn encode_frame(power: PowerUpdate, a: &[Slot; SLOTS], b: &[Slot; SLOTS]) -> [u8; FRAME_LEN] {
    let mut f = [0u8; FRAME_LEN];
    f[0] = HDR_FRAME;
    f[1] = (power.serial & 0x0F) << 4 | (power.mode & 0x0F);
    f[2] = power.power_a;
    f[3] = power.power_b;
    for i in 0..SLOTS {
        f[4 + i] = a[i].freq;
        f[8 + i] = a[i].intensity;
        f[12 + i] = b[i].freq;
        f[16 + i] = b[i].intensity;
    }
    f
}

// ───────────────────────────────────────────────────────────────
// Serial numbers
// ───────────────────────────────────────────────────────────────

/// Cycles the request serial through 1..=15.  Zero is reserved for
/// "no request".
#[derive(Debug, Clone, Default)]
pub struct SerialCounter {
    last: u8,
}

impl SerialCounter {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next(&mut self) -> u8 {
        self.last = if self.last >= 0x0F { 1 } else { self.last + 1 };
        self.last
    }
}

// ───────────────────────────────────────────────────────────────
// Balance / soft limits
// ───────────────────────────────────────────────────────────────

/// Soft limits and balance parameters, shared by BF (write) and BE (report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub limit_a: u8,
    pub limit_b: u8,
    pub freq_balance_a: u8,
    pub freq_balance_b: u8,
    pub intensity_balance_a: u8,
    pub intensity_balance_b: u8,
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            limit_a: MAX_POWER,
            limit_b: MAX_POWER,
            freq_balance_a: 32,
            freq_balance_b: 32,
            intensity_balance_a: 32,
            intensity_balance_b: 32,
        }
    }
}

impl Balance {
    pub fn encode(&self) -> [u8; BALANCE_FRAME_LEN] {
        [
            HDR_BALANCE,
            self.limit_a,
            self.limit_b,
            self.freq_balance_a,
            self.freq_balance_b,
            self.intensity_balance_a,
            self.intensity_balance_b,
        ]
    }

    fn from_body(b: &[u8]) -> Self {
        Self {
            limit_a: b[0],
            limit_b: b[1],
            freq_balance_a: b[2],
            freq_balance_b: b[3],
            intensity_balance_a: b[4],
            intensity_balance_b: b[5],
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Notifications
// ───────────────────────────────────────────────────────────────

/// A decoded 0x150B notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// B1: the device's current powers, tagged with the serial they answer.
    PowerAck { serial: u8, power_a: u8, power_b: u8 },
    /// BE: soft limits and balance as the device sees them.
    Report(Balance),
}

impl Response {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolAnomaly> {
        let Some(&header) = data.first() else {
            return Err(ProtocolAnomaly::Empty);
        };
        let need = match header {
            HDR_ACK => 4,
            HDR_REPORT => BALANCE_FRAME_LEN,
            other => return Err(ProtocolAnomaly::UnexpectedFrame(other)),
        };
        if data.len() < need {
            return Err(ProtocolAnomaly::Truncated {
                header,
                len: data.len(),
            });
        }
        Ok(match header {
            HDR_ACK => Self::PowerAck {
                serial: data[1],
                power_a: data[2],
                power_b: data[3],
            },
            _ => Self::Report(Balance::from_body(&data[1..BALANCE_FRAME_LEN])),
        })
    }
}
