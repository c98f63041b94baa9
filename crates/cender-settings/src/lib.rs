//! Cender Settings Crate
//!
//! Handles the configuration object passed into a controller at construction,
//! and its persistence as JSON or TOML.

pub mod config;

pub use config::{
    CommonSettings, Config, ConnectionSettings, FlowControl, MachineSettings, Parity,
    SharedConfig,
};
