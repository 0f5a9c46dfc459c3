//! Device lifecycle state machine.
//!
//! ```text
//!  UNFOUND ──▶ FOUND ──▶ CONNECTING ──▶ CONNECTED ──▶ INITIALIZING ──▶ READY ──▶ SERVICING
//!                ▲           │  ▲            ▲               │                      │
//!                └───────────┘  │            └───────────────┘                      │
//!              (connect failed) │            (init failed)                          │
//!                               │                                                   │
//!                          DISCONNECTED ◀────────────── link lost ───────────────────┘
//! ```
//!
//! The current state lives in a single atomic so the transport's
//! disconnect callback and the lifecycle driver can race without a lock.
//! Every transition is a compare-and-swap: a late `READY` never overwrites
//! a `DISCONNECTED` that landed first.  The device flags (found,
//! connected, initialized) are derived from the state, so
//! `initialized ⟹ connected ⟹ found` holds by construction.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use log::{info, warn};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Unfound = 0,
    Found = 1,
    Connecting = 2,
    Connected = 3,
    Initializing = 4,
    Ready = 5,
    Servicing = 6,
    Disconnected = 7,
}

impl LifecycleState {
    /// Total number of states.
    pub const COUNT: usize = 8;

    /// Convert an index back to a state.  Out-of-range indices trip a
    /// debug assertion and map to `Disconnected` in release builds.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Unfound,
            1 => Self::Found,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Initializing,
            5 => Self::Ready,
            6 => Self::Servicing,
            7 => Self::Disconnected,
            _ => {
                debug_assert!(false, "invalid lifecycle index: {idx}");
                Self::Disconnected
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unfound => "UNFOUND",
            Self::Found => "FOUND",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Servicing => "SERVICING",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    pub fn is_found(self) -> bool {
        self != Self::Unfound
    }

    pub fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Initializing | Self::Ready | Self::Servicing
        )
    }

    pub fn is_initialized(self) -> bool {
        matches!(self, Self::Ready | Self::Servicing)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition(self, to: Self) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (Unfound, Found)
            | (Found | Disconnected, Connecting)
            | (Connecting, Connected | Found | Disconnected)
            | (Connected, Initializing)
            | (Initializing, Ready | Connected)
            | (Ready, Servicing) => true,
            (from, Disconnected) => from.is_connected(),
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Shared state cell
// ---------------------------------------------------------------------------

/// Lock-free holder of one device's [`LifecycleState`].
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub const fn new(initial: LifecycleState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_index(self.state.load(Ordering::Acquire) as usize)
    }

    /// Move `from -> to` if the cell still holds `from` and the edge is
    /// legal.  Returns `false` (and changes nothing) otherwise.
    pub fn transition(&self, owner: &str, from: LifecycleState, to: LifecycleState) -> bool {
        if !from.can_transition(to) {
            warn!("{owner}: illegal transition {from} -> {to}");
            return false;
        }
        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!("{owner}: {from} -> {to}");
                true
            }
            Err(actual) => {
                info!(
                    "{owner}: {from} -> {to} superseded by {}",
                    LifecycleState::from_index(actual as usize)
                );
                false
            }
        }
    }

    /// Move to `Disconnected` from whatever connected state the cell
    /// holds.  Returns the state that was left, or `None` if the cell was
    /// not connected.
    pub fn drop_link(&self, owner: &str) -> Option<LifecycleState> {
        let mut current = self.load();
        while current.is_connected() {
            match self.state.compare_exchange(
                current as u8,
                LifecycleState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    info!("{owner}: {current} -> {}", LifecycleState::Disconnected);
                    return Some(current);
                }
                Err(actual) => current = LifecycleState::from_index(actual as usize),
            }
        }
        None
    }
}
