//! # Cender
//!
//! Serial protocol engine for TinyG CNC controllers.
//!
//! ## Architecture
//!
//! Cender is organized as a workspace with multiple crates:
//!
//! 1. **cender-core** - Axis and mode data model, errors, the board event bus
//! 2. **cender-settings** - Configuration and its persistence
//! 3. **cender-communication** - Serial transport, command queues, TinyG
//!    response parsing and the [`ControllerBoard`]
//! 4. **cender** - Command line sender that integrates all crates

pub use cender_communication::{
    firmware, is_valid_cnc_port, list_ports, BackoffStage, BoardState, ControllerBoard,
    SerialPortInfo,
};
pub use cender_core::{
    Axis, BoardEvent, BoardType, ConnectionState, DistanceMode, Error, EventBus, Result,
    UnitMode,
};
pub use cender_settings::{Config, SharedConfig};

use std::path::Path;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// `RUST_LOG` wins over `default_level`. With `json` set, events are written
/// as one JSON object per line, otherwise in the compact human format.
pub fn init_logging(default_level: &str, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_names(true)
                    .with_line_number(true),
            )
            .try_init()?;
    }

    Ok(())
}

/// Load the configuration from `path`, or from the platform default location
///
/// A missing file is created with defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_or_default(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let again = load_config(Some(&path)).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_load_config_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "port = 1").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
