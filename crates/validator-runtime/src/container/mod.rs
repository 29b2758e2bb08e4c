//! # Runtime Container
//!
//! Configuration for the listener and its collaborators.

pub mod config;

pub use config::{AppConfig, BusConfig, ConfigError, ProbeConfig, RuntimeConfig, ValidatorConfig};
