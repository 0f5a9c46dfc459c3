//! Wire codecs for the two Coyote hardware revisions.
//!
//! ```text
//! ┌─────────────┐   set_waveform    ┌─────────────┐   encode   ┌───────────┐
//! │ V2Segment   │──────────────────▶│ Channel<S>  │───────────▶│ GATT write│
//! │ V3Segment   │   (V2 → V3 conv)  │  playback   │            │           │
//! └─────────────┘                   └─────────────┘            └───────────┘
//! ```
//!
//! Both revisions share the same playback model: a segment has a duration
//! that is a pure function of its parameters, and a repeat count.  Only the
//! parameter tuple, its bit layout, and the duration curve differ.

pub mod v2;
pub mod v3;

use core::fmt;

/// 128-bit GATT UUID, stored big-endian as written in documentation.
pub type Uuid = u128;

/// Bluetooth SIG base UUID (`0000xxxx-0000-1000-8000-00805F9B34FB`).
const SIG_BASE_UUID: Uuid = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16-bit SIG-assigned UUID onto the base UUID.
pub const fn uuid16(short: u16) -> Uuid {
    SIG_BASE_UUID | ((short as u128) << 96)
}

/// Period of one playback tick.  Segment lengths are rounded up to a
/// whole number of these.
pub const SEGMENT_TICK_MS: u32 = 100;

/// Playback parameters shared by both wire formats.
pub trait Segment: Copy + Send + 'static {
    /// Duration of one repetition in milliseconds.
    fn duration_ms(&self) -> u32;

    /// How many times the segment is played before advancing.
    fn repeat(&self) -> u16;

    /// Number of emission ticks the segment occupies:
    /// `ceil(duration / tick) × repeat`, never zero.
    fn emission_ticks(&self, tick_ms: u32) -> u32 {
        let per_repeat = self.duration_ms().div_ceil(tick_ms.max(1)).max(1);
        per_repeat * u32::from(self.repeat().max(1))
    }
}

/// Display adapter rendering a [`Uuid`] in canonical 8-4-4-4-12 form.
pub struct UuidFmt(pub Uuid);

impl fmt::Display for UuidFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (u >> 96) as u32,
            (u >> 80) as u16,
            (u >> 64) as u16,
            (u >> 48) as u16,
            u & 0xFFFF_FFFF_FFFF
        )
    }
}
