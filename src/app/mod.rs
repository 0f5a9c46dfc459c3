//! Application core: device lifecycle and registry with zero radio I/O.
//!
//! Everything that touches the BLE stack goes through the **port traits**
//! in [`ports`], so this layer runs unchanged against the host simulation
//! in [`crate::adapters::sim`].

pub mod device;
pub mod events;
pub mod ports;
pub mod registry;
