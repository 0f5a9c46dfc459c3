//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements            | Connects to                     |
//! |------------|-----------------------|---------------------------------|
//! | `log_sink` | EventSink             | `log` facade                    |
//! | `sim`      | GattClient            | In-memory Coyote V2/V3 peer     |
//! |            | ClientPool            | Bounded set of sim clients      |
//! |            | TimePort              | Manually advanced clock         |
//! | `time`     | TimePort              | `std::time::Instant`            |
//!
//! An on-target NimBLE binding would sit alongside these and implement
//! `GattClient` / `ClientPool` over the real stack.

pub mod log_sink;
pub mod sim;
pub mod time;
