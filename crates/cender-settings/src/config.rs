//! Configuration for Cender
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, line parameters, timeouts)
//! - Common behaviour flags (board type, comments, filtering, back-off)
//! - Machine preferences (feed rate, precision)
//! - Last known positions, written while coordinate tracking is on
//!
//! Every section is `#[serde(default)]`, so a key missing from the file falls
//! back to its default rather than failing the load.

use cender_core::{Axis, BoardType, ConfigError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration shared between the controller and its owner
pub type SharedConfig = Arc<RwLock<Config>>;

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Serial flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control
    None,
    /// Hardware RTS/CTS
    #[default]
    Rtscts,
    /// Software XON/XOFF
    Xonxoff,
}

impl std::fmt::Display for FlowControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Rtscts => write!(f, "rtscts"),
            Self::Xonxoff => write!(f, "xonxoff"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Stop bits, 1 or 2
    pub stop_bits: u8,
    /// Flow control
    pub flow_control: FlowControl,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// How long to wait for the connect echo, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::Rtscts,
            read_timeout_ms: 0,
            write_timeout_ms: 1000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Behaviour flags shared by every board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonSettings {
    /// Firmware variant to talk to
    pub board_type: BoardType,
    /// Append a `(comment)` to commands the controller generates
    pub add_gcode_comments_for_system_commands: bool,
    /// Split and strip comments from files before streaming
    pub filter_file_commands: bool,
    /// Truncate coordinate decimals to `machine.file_precision`
    pub restrict_file_precision: bool,
    /// Run the limit back-off sequence automatically on a limit hit
    pub auto_limit_back_off: bool,
    /// Refuse homing cycles
    pub disable_homing: bool,
    /// Default tracing filter directive
    pub log_level: String,
}

impl Default for CommonSettings {
    fn default() -> Self {
        Self {
            board_type: BoardType::default(),
            add_gcode_comments_for_system_commands: true,
            filter_file_commands: true,
            restrict_file_precision: true,
            auto_limit_back_off: true,
            disable_homing: false,
            log_level: "info".to_string(),
        }
    }
}

/// Machine preference settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    /// Feed rate for G1 jog and back-off moves, in units/min
    pub feed_rate: f64,
    /// Decimal digits kept when precision restriction is on
    pub file_precision: usize,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            feed_rate: 500.0,
            file_precision: 4,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Behaviour flags
    pub common: CommonSettings,
    /// Machine preferences
    pub machine: MachineSettings,
    /// Last known coordinate per axis letter
    pub last_positions: BTreeMap<String, f64>,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this config for sharing with a controller
    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Platform config location, e.g. `~/.config/cender/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| ConfigError::File {
            path: "<config dir>".to_string(),
            reason: "no configuration directory on this platform".to_string(),
        })?;
        Ok(dir.join("cender").join("config.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| file_error(path, e))?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)
                .map_err(|e| ConfigError::Format(format!("Invalid JSON config: {}", e)))?,
            Format::Toml => toml::from_str(&content)
                .map_err(|e| ConfigError::Format(format!("Invalid TOML config: {}", e)))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load config, writing the defaults back if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from_file(path);
        }

        tracing::info!("No config at {}, writing defaults", path.display());
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| file_error(parent, e))?;
        }
        config.save_to_file(path)?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::Format(format!("Failed to serialize config: {}", e)))?,
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| ConfigError::Format(format!("Failed to serialize config: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| file_error(path, e))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.port.trim().is_empty() {
            return Err(invalid("connection.port", "must not be empty"));
        }

        if self.connection.baud_rate == 0 {
            return Err(invalid("connection.baud_rate", "must be > 0"));
        }

        if !matches!(self.connection.stop_bits, 1 | 2) {
            return Err(invalid("connection.stop_bits", "must be 1 or 2"));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(invalid("connection.connect_timeout_ms", "must be > 0"));
        }

        if self.machine.feed_rate <= 0.0 {
            return Err(invalid("machine.feed_rate", "must be > 0"));
        }

        if self.machine.file_precision > 10 {
            return Err(invalid("machine.file_precision", "must be at most 10"));
        }

        Ok(())
    }

    /// Last known coordinate of an axis
    pub fn last_position(&self, axis: Axis) -> Option<f64> {
        self.last_positions.get(&axis.letter().to_string()).copied()
    }

    /// Record the last known coordinate of an axis
    pub fn set_last_position(&mut self, axis: Axis, position: f64) {
        self.last_positions
            .insert(axis.letter().to_string(), position);
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            _ => Err(ConfigError::Format("Config file must be .json or .toml".to_string()).into()),
        }
    }
}

fn file_error(path: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn invalid(field: &str, reason: &str) -> cender_core::Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.connection.flow_control, FlowControl::Rtscts);
        assert_eq!(config.common.board_type, BoardType::TinyG097);
        assert!(config.common.add_gcode_comments_for_system_commands);
        assert_eq!(config.machine.file_precision, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.connection.stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.machine.feed_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyACM0"

            [common]
            board_type = "tinyg-0.96"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.connection.port, "/dev/ttyACM0");
        assert_eq!(config.connection.baud_rate, 115200);
        assert_eq!(config.common.board_type, BoardType::TinyG096);
        assert!(config.common.filter_file_commands);
        assert_eq!(config.machine.feed_rate, 500.0);
    }

    #[test]
    fn test_last_positions() {
        let mut config = Config::default();
        assert_eq!(config.last_position(Axis::X), None);
        config.set_last_position(Axis::X, 12.5);
        assert_eq!(config.last_position(Axis::X), Some(12.5));
        assert_eq!(config.last_positions.get("x"), Some(&12.5));
    }
}
