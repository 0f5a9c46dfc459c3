//! Port traits: the hexagonal boundary between the lifecycle core and the
//! BLE stack.
//!
//! ```text
//!   BLE stack adapter ──▶ GattClient / ClientPool ──▶ Device (domain)
//! ```
//!
//! The core never talks to a radio directly.  A host simulation
//! ([`crate::adapters::sim`]) and any on-target NimBLE binding implement
//! these traits.
//!
//! ## Threading
//!
//! - [`GattClient`] handles are shared (`Arc`) between the lifecycle
//!   driver and notification callbacks, so every method takes `&self`.
//! - Notification and disconnect callbacks run on the transport's own
//!   context.  They must not block.

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use heapless::Vec;

use crate::app::events::DeviceEvent;
use crate::error::{Error, GattError, RegistryError};
use crate::protocol::Uuid;

/// Maximum payload of a single characteristic write.
pub const MAX_WRITE_LEN: usize = 20;

/// Capacity of a characteristic read buffer.
pub const MAX_ATTR_LEN: usize = 32;

/// Value returned by a characteristic read.
pub type AttrValue = Vec<u8, MAX_ATTR_LEN>;

/// Raw notification payload callback.
pub type NotifyFn = Box<dyn FnMut(&[u8]) + Send>;

/// Link-loss callback.
pub type DisconnectFn = Box<dyn FnMut() + Send>;

// ───────────────────────────────────────────────────────────────
// Addresses and advertisements
// ───────────────────────────────────────────────────────────────

/// 48-bit Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress(pub [u8; 6]);

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for BleAddress {
    type Err = Error;

    /// Parse `aa:bb:cc:dd:ee:ff` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = Error::Config("invalid BLE address");
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut out {
            let part = parts.next().ok_or(invalid)?;
            if part.len() != 2 {
                return Err(invalid);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid)?;
        }
        if parts.next().is_some() {
            return Err(invalid);
        }
        Ok(Self(out))
    }
}

/// One scan result, as delivered by the discovery collaborator.
#[derive(Debug, Clone, Copy)]
pub struct Advertisement<'a> {
    pub name: &'a str,
    pub address: BleAddress,
}

/// Handle to one characteristic on a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub uuid: Uuid,
}

// ───────────────────────────────────────────────────────────────
// GATT client port (driven adapter: domain → BLE stack)
// ───────────────────────────────────────────────────────────────

/// One central-role connection to a remote peripheral.
pub trait GattClient: Send + Sync {
    /// Establish the link.  `refresh = false` reuses cached attributes.
    /// Must give up after `timeout_ms`.
    fn connect(&self, peer: BleAddress, refresh: bool, timeout_ms: u32) -> Result<(), GattError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&self);

    /// Address this client was last connected to, if any.
    fn peer_address(&self) -> Option<BleAddress>;

    /// Install the link-loss callback, replacing any previous one.
    fn set_disconnect_handler(&self, handler: DisconnectFn);

    fn discover_attributes(&self) -> Result<(), GattError>;

    fn has_service(&self, service: Uuid) -> bool;

    fn find_characteristic(&self, service: Uuid, uuid: Uuid) -> Option<CharacteristicRef>;

    /// Blocking read.
    fn read(&self, ch: CharacteristicRef) -> Result<AttrValue, GattError>;

    /// Write without response.  `data` is at most [`MAX_WRITE_LEN`] bytes.
    fn write(&self, ch: CharacteristicRef, data: &[u8]) -> Result<(), GattError>;

    /// Enable notifications and route each payload to `callback`.
    fn subscribe(&self, ch: CharacteristicRef, callback: NotifyFn) -> Result<(), GattError>;
}

// ───────────────────────────────────────────────────────────────
// Client pool port
// ───────────────────────────────────────────────────────────────

/// Hands out [`GattClient`] handles.  The BLE stack owns a bounded number
/// of them, so the lifecycle prefers reuse over creation.
pub trait ClientPool {
    /// A client previously associated with `peer`, connected or not.
    fn client_for_peer(&mut self, peer: BleAddress) -> Option<Arc<dyn GattClient>>;

    /// Any idle, disconnected client.
    fn free_client(&mut self) -> Option<Arc<dyn GattClient>>;

    /// A brand new client for `peer`, or `None` once the stack is out of
    /// client slots.
    fn create_client(&mut self, peer: BleAddress) -> Option<Arc<dyn GattClient>>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / UI)
// ───────────────────────────────────────────────────────────────

/// The lifecycle emits structured [`DeviceEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &DeviceEvent);
}

// ───────────────────────────────────────────────────────────────
// Time port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait TimePort {
    fn now_ms(&self) -> u64;
}

/// Copy `name` into a fixed-capacity buffer.
pub(crate) fn bounded_name<const N: usize>(name: &str) -> Result<heapless::String<N>, RegistryError> {
    let mut s = heapless::String::new();
    s.push_str(name).map_err(|()| RegistryError::NameTooLong)?;
    Ok(s)
}
