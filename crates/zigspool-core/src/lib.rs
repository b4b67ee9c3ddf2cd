//! Core types for zigspool.
//!
//! Configuration loading and the error taxonomy shared by the device layer
//! and the `zigspool` binary.

pub mod config;
pub mod error;

pub use config::{BridgeConfig, FreshnessConfig, MqttEndpoint, MqttSettings};
pub use error::{BridgeError, ConfigError, Result, SpoolError};
