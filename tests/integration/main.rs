//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the in-memory BLE simulation.  All tests run on the host with
//! no radio required.

mod fixtures;
mod lifecycle_tests;
mod registry_tests;
mod v3_engine_tests;
