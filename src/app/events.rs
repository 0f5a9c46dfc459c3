//! Outbound lifecycle events.
//!
//! Each [`Device`](super::device::Device) emits these through its
//! [`EventSink`](super::ports::EventSink).  On a clean bring-up the order
//! is always `Found, StartConnect, Connected, StartInit, Init`.  `Error`
//! replaces `Connected` or `Init` when that step fails.  `Disconnected`
//! arrives asynchronously from the transport.

use core::fmt;

use heapless::String;

use super::device::NAME_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Found,
    StartConnect,
    Connected,
    StartInit,
    Init,
    Error,
    Disconnected,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Found => "FOUND",
            Self::StartConnect => "START_CONNECT",
            Self::Connected => "CONNECTED",
            Self::StartInit => "START_INIT",
            Self::Init => "INIT",
            Self::Error => "ERROR",
            Self::Disconnected => "DISCONNECTED",
        })
    }
}

/// A lifecycle event tagged with the unique name of its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device: String<NAME_LEN>,
    pub event: LifecycleEvent,
}
