//! Coyote link library.
//!
//! Lifecycle management and protocol engines for DG-LAB Coyote V2/V3
//! e-stim peripherals over BLE.  The BLE stack itself sits behind the port
//! traits in [`app::ports`]; [`adapters::sim`] implements them in memory
//! for host tests.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod channel;
pub mod config;
pub mod coyote;
pub mod error;
pub mod fsm;
pub mod protocol;
pub mod safety;
pub mod scheduler;

pub use error::{Error, Result};
