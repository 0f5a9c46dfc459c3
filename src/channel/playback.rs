//! Waveform playback cursor.
//!
//! The queue is an endlessly repeating sequence.  The cursor walks it one
//! emission tick at a time:
//!
//! ```text
//!   ┌──────────────┐  remaining == 0   ┌──────────────────────────┐
//!   │ emit current │──────────────────▶│ advance (wrap at end),    │
//!   │ remaining -= 1│◀─────────────────│ remaining = ticks(segment)│
//!   └──────────────┘                   └──────────────────────────┘
//! ```
//!
//! `cursor == queue.len()` means "exhausted": the next tick starts from the
//! first segment.  Replacing the queue or (re)arming resets to exhausted so
//! playback always starts cleanly.

use heapless::Vec;

use crate::error::WaveformError;
use crate::protocol::Segment;

/// Maximum number of segments one waveform may hold.
pub const MAX_SEGMENTS: usize = 64;

pub(crate) struct Playback<S> {
    queue: Vec<S, MAX_SEGMENTS>,
    cursor: usize,
    remaining: u32,
    armed: bool,
    /// Set when a fresh waveform is loaded or playback is (re)armed.
    restart: bool,
}

impl<S: Segment> Playback<S> {
    pub(crate) const fn new() -> Self {
        Self {
            queue: Vec::new(),
            cursor: 0,
            remaining: 0,
            armed: false,
            restart: false,
        }
    }

    /// Swap in a new queue.  On error the previous queue is left intact.
    pub(crate) fn replace<I>(&mut self, segments: I) -> Result<(), WaveformError>
    where
        I: IntoIterator<Item = S>,
    {
        let mut queue = Vec::new();
        for seg in segments {
            queue.push(seg).map_err(|_| WaveformError::TooLong)?;
        }
        self.queue = queue;
        self.rewind();
        self.restart = true;
        Ok(())
    }

    /// Arm playback.  Returns `false` if the queue is empty or already armed.
    pub(crate) fn arm(&mut self) -> bool {
        if self.queue.is_empty() || self.armed {
            return false;
        }
        self.rewind();
        self.armed = true;
        self.restart = true;
        true
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.restart = false;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Consume the restart flag.  Only reported while armed.
    pub(crate) fn take_restart(&mut self) -> bool {
        let fresh = self.restart && self.armed;
        self.restart = false;
        fresh
    }

    /// Advance one emission tick and return the segment to emit, or `None`
    /// when unarmed or empty.
    pub(crate) fn tick(&mut self, tick_ms: u32) -> Option<S> {
        if !self.armed || self.queue.is_empty() {
            return None;
        }
        if self.remaining == 0 {
            // An exhausted cursor (== len) also lands on the first segment.
            self.cursor = if self.cursor + 1 >= self.queue.len() {
                0
            } else {
                self.cursor + 1
            };
            self.remaining = self.queue[self.cursor].emission_ticks(tick_ms);
        }
        self.remaining -= 1;
        Some(self.queue[self.cursor])
    }

    fn rewind(&mut self) {
        self.cursor = self.queue.len();
        self.remaining = 0;
    }
}
