//! Unified error types for the Coyote link core.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! bring-up path's error handling uniform.  All variants are `Copy` so they
//! can be passed through the lifecycle engine and logged without allocation.
//!
//! Protocol anomalies and rejected power requests also live here, but they
//! never reach [`Error`]: the engines log and self-correct them.

use core::fmt;

use crate::protocol::{Uuid, UuidFmt};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible lifecycle operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Device registry rejected the operation.
    Registry(RegistryError),
    /// Link establishment failed.
    Connect(ConnectError),
    /// Protocol-specific initialisation failed.
    Init(InitError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Connect(e) => write!(f, "connect: {e}"),
            Self::Init(e) => write!(f, "init: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Another device already uses this unique name.
    DuplicateName,
    /// All registry slots are taken.
    Full,
    /// No device with the requested unique name.
    UnknownDevice,
    /// Name does not fit the fixed-capacity name buffer.
    NameTooLong,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName => write!(f, "duplicate unique name"),
            Self::Full => write!(f, "registry full"),
            Self::UnknownDevice => write!(f, "unknown device"),
            Self::NameTooLong => write!(f, "name too long"),
        }
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ---------------------------------------------------------------------------
// Connect errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// The device has not been matched against an advertisement yet.
    NotFound,
    /// The transport could not hand out a client.
    NoClient,
    /// The transport failed to establish the link (or timed out).
    Failed(GattError),
    /// The transport reported success but the link is not up.
    NotConnected,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "device not found yet"),
            Self::NoClient => write!(f, "no transport client available"),
            Self::Failed(e) => write!(f, "link failed: {e}"),
            Self::NotConnected => write!(f, "link not up after connect"),
        }
    }
}

impl From<ConnectError> for Error {
    fn from(e: ConnectError) -> Self {
        Self::Connect(e)
    }
}

// ---------------------------------------------------------------------------
// Init errors
// ---------------------------------------------------------------------------

/// Initialisation is fail-closed: any missing required element aborts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Attribute discovery failed.
    DiscoveryFailed(GattError),
    /// A required GATT service is absent.
    MissingService(Uuid),
    /// A required characteristic is absent.
    MissingCharacteristic(Uuid),
    /// Reading a required characteristic failed.
    ReadFailed(Uuid),
    /// Subscribing to a required notification failed.
    SubscribeFailed(Uuid),
    /// The peripheral reported unusable parameters.
    InvalidConfig(&'static str),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiscoveryFailed(e) => write!(f, "attribute discovery failed: {e}"),
            Self::MissingService(u) => write!(f, "missing service {}", UuidFmt(*u)),
            Self::MissingCharacteristic(u) => {
                write!(f, "missing characteristic {}", UuidFmt(*u))
            }
            Self::ReadFailed(u) => write!(f, "read of {} failed", UuidFmt(*u)),
            Self::SubscribeFailed(u) => write!(f, "subscribe to {} failed", UuidFmt(*u)),
            Self::InvalidConfig(msg) => write!(f, "invalid peripheral config: {msg}"),
        }
    }
}

impl From<InitError> for Error {
    fn from(e: InitError) -> Self {
        Self::Init(e)
    }
}

// ---------------------------------------------------------------------------
// Transport port errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattError {
    NotConnected,
    Timeout,
    UnknownAttribute,
    TooLong,
    Io,
}

impl fmt::Display for GattError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Timeout => write!(f, "timed out"),
            Self::UnknownAttribute => write!(f, "unknown attribute"),
            Self::TooLong => write!(f, "value exceeds max attribute length"),
            Self::Io => write!(f, "GATT I/O error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel-level outcomes (logged, never escalated)
// ---------------------------------------------------------------------------

/// A power request dropped by the safe-mode guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRejected {
    /// Jump from the last requested value is too large.
    JumpFromRequested { from: u8, to: u8 },
    /// Jump from the last confirmed value is too large.
    JumpFromConfirmed { from: u8, to: u8 },
}

impl fmt::Display for PowerRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JumpFromRequested { from, to } => {
                write!(f, "unsafe jump from requested {from} to {to}")
            }
            Self::JumpFromConfirmed { from, to } => {
                write!(f, "unsafe jump from confirmed {from} to {to}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformError {
    /// More segments than a queue can hold.
    TooLong,
}

impl fmt::Display for WaveformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong => write!(f, "waveform exceeds queue capacity"),
        }
    }
}

/// Unexpected bytes from the peripheral.  Logged and self-corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAnomaly {
    /// Acknowledgement serial does not match the outstanding request.
    SerialMismatch { expected: u8, got: u8 },
    /// Frame shorter than its header requires.
    Truncated { header: u8, len: usize },
    /// Unknown frame header.
    UnexpectedFrame(u8),
    /// Empty notification payload.
    Empty,
}

impl fmt::Display for ProtocolAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialMismatch { expected, got } => write!(
                f,
                "unexpected response serial 0x{got:02x} instead of 0x{expected:02x}"
            ),
            Self::Truncated { header, len } => {
                write!(f, "frame 0x{header:02x} truncated at {len} bytes")
            }
            Self::UnexpectedFrame(h) => write!(f, "unexpected 0x{h:02x} frame"),
            Self::Empty => write!(f, "empty notification"),
        }
    }
}

impl std::error::Error for GattError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
