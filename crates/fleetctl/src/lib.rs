//! fleetctl library
//!
//! Configuration model, logging bootstrap and the glue that turns a
//! `FleetConfig` into ready-to-use engines. The binary in `main.rs` only
//! parses arguments and prints.

pub mod config;
pub mod logging;
pub mod setup;

pub use config::{ConfigError, FleetConfig};
