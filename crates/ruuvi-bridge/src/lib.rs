//! RuuviTag advertisement bridge daemon.
//!
//! Wires the pieces from `ruuvi-core` together: a btleplug-backed
//! [`source::BleSource`], TOML [`config`], and the console/MQTT/HTTP
//! [`sink`]s the pipeline can deliver to.

pub mod config;
pub mod sink;
pub mod source;

pub use config::{Config, ConfigError};
pub use source::BleSource;
