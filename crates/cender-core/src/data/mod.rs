//! Data models for axes, machine modes and connection state
//!
//! This module provides:
//! - The fixed axis set (X, Y, Z, A) and per-axis storage
//! - Distance, unit and movement modes
//! - Connection lifecycle states
//! - Board type selection for picking a firmware variant

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
    /// A (rotary) axis
    A,
}

impl Axis {
    /// Every axis a board can report, in board index order
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::A];

    /// Lower-case axis letter as used in board configuration keys
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
            Axis::A => 'a',
        }
    }

    /// Index into [`Axis::ALL`]
    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::A => 3,
        }
    }

    /// Axis for a board axis index (`$1ma=0` maps motor 1 to X)
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Parse an axis letter, case-insensitive
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_lowercase() {
            'x' => Some(Axis::X),
            'y' => Some(Axis::Y),
            'z' => Some(Axis::Z),
            'a' => Some(Axis::A),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter().to_ascii_uppercase())
    }
}

/// Per-axis storage indexed by [`Axis`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisMap<T> {
    values: [Option<T>; 4],
}

impl<T: Copy> AxisMap<T> {
    /// Create an empty map
    pub fn new() -> Self {
        Self { values: [None; 4] }
    }

    /// Get the value stored for an axis
    pub fn get(&self, axis: Axis) -> Option<T> {
        self.values[axis.index()]
    }

    /// Store a value for an axis
    pub fn set(&mut self, axis: Axis, value: T) {
        self.values[axis.index()] = Some(value);
    }

    /// Remove the value stored for an axis
    pub fn clear(&mut self, axis: Axis) {
        self.values[axis.index()] = None;
    }

    /// Iterate over the axes that hold a value
    pub fn iter(&self) -> impl Iterator<Item = (Axis, T)> + '_ {
        Axis::ALL
            .iter()
            .filter_map(move |axis| self.get(*axis).map(|value| (*axis, value)))
    }
}

/// Which end of an axis a limit switch sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisDirection {
    /// Minimum end
    Min,
    /// Maximum end
    Max,
}

impl fmt::Display for AxisDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisDirection::Min => write!(f, "min"),
            AxisDirection::Max => write!(f, "max"),
        }
    }
}

/// Interpretation of coordinate words in motion commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMode {
    /// G90
    Absolute,
    /// G91
    Relative,
}

impl DistanceMode {
    /// G-code selecting this mode
    pub fn gcode(&self) -> &'static str {
        match self {
            DistanceMode::Absolute => "G90",
            DistanceMode::Relative => "G91",
        }
    }

    /// Board flag value (`gdi`): 0 absolute, 1 relative
    pub fn flag(&self) -> u8 {
        match self {
            DistanceMode::Absolute => 0,
            DistanceMode::Relative => 1,
        }
    }

    /// Mode for a board flag value
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim() {
            "0" => Some(DistanceMode::Absolute),
            "1" => Some(DistanceMode::Relative),
            _ => None,
        }
    }
}

/// Unit mode reported by the board (`gun`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitMode {
    /// Inches, G20
    Imperial,
    /// Millimetres, G21
    Metric,
}

impl UnitMode {
    /// G-code selecting these units
    pub fn gcode(&self) -> &'static str {
        match self {
            UnitMode::Imperial => "G20",
            UnitMode::Metric => "G21",
        }
    }

    /// Mode for a board flag value: 0 inches, 1 millimetres
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim() {
            "0" => Some(UnitMode::Imperial),
            "1" => Some(UnitMode::Metric),
            _ => None,
        }
    }
}

/// Motion word used for jog and back-off moves
///
/// Rapid while the spindle is off, feed while it cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MovementGcode {
    /// G0
    #[default]
    Rapid,
    /// G1
    Feed,
}

impl MovementGcode {
    /// The motion word
    pub fn gcode(&self) -> &'static str {
        match self {
            MovementGcode::Rapid => "G0",
            MovementGcode::Feed => "G1",
        }
    }
}

/// Spindle rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleDirection {
    /// M3
    Clockwise,
    /// M4
    CounterClockwise,
}

/// Kind of home switch discovered in the board configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HomeSwitchType {
    /// Switch configured for homing only (`1`)
    HomingOnly,
    /// Switch configured for homing and limit (`3`)
    HomingAndLimit,
}

impl HomeSwitchType {
    /// Switch type for a `<axis>sn` / `<axis>sx` value
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim() {
            "1" => Some(HomeSwitchType::HomingOnly),
            "3" => Some(HomeSwitchType::HomingAndLimit),
            _ => None,
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No port open
    #[default]
    Disconnected,
    /// Port open, waiting for the connect echo
    Connecting,
    /// Connect echo received, configuration dump in progress
    FetchingConfig,
    /// Configuration fetched, ready for commands
    Connected,
}

impl ConnectionState {
    /// Check if a port is held in this state
    pub fn has_port(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::FetchingConfig => write!(f, "Fetching Config"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Board firmware selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoardType {
    /// TinyG 0.96, free-slot queue reports
    #[serde(rename = "tinyg-0.96")]
    TinyG096,
    /// TinyG 0.97, queue reports with in/out counts
    #[default]
    #[serde(rename = "tinyg-0.97")]
    TinyG097,
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardType::TinyG096 => write!(f, "TinyG 0.96"),
            BoardType::TinyG097 => write!(f, "TinyG 0.97"),
        }
    }
}

impl FromStr for BoardType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tinyg-0.96" | "tinyg 0.96" | "0.96" => Ok(BoardType::TinyG096),
            "tinyg-0.97" | "tinyg 0.97" | "0.97" => Ok(BoardType::TinyG097),
            other => Err(ProtocolError::UnknownBoard {
                board_type: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_index_round_trip() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_index(axis.index()), Some(axis));
            assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
        }
        assert_eq!(Axis::from_index(4), None);
        assert_eq!(Axis::from_letter('B'), None);
    }

    #[test]
    fn test_axis_map() {
        let mut map = AxisMap::new();
        map.set(Axis::Z, 1.5);
        map.set(Axis::X, -2.0);
        assert_eq!(map.get(Axis::Y), None);
        let collected: Vec<_> = map.iter().collect();
        assert_eq!(collected, vec![(Axis::X, -2.0), (Axis::Z, 1.5)]);
        map.clear(Axis::X);
        assert_eq!(map.get(Axis::X), None);
    }

    #[test]
    fn test_board_type_parse() {
        assert_eq!("TinyG 0.97".parse::<BoardType>().ok(), Some(BoardType::TinyG097));
        assert_eq!("tinyg-0.96".parse::<BoardType>().ok(), Some(BoardType::TinyG096));
        assert!("grbl".parse::<BoardType>().is_err());
    }

    #[test]
    fn test_mode_flags() {
        assert_eq!(DistanceMode::from_flag("1"), Some(DistanceMode::Relative));
        assert_eq!(UnitMode::from_flag("1"), Some(UnitMode::Metric));
        assert_eq!(HomeSwitchType::from_flag("3"), Some(HomeSwitchType::HomingAndLimit));
        assert_eq!(HomeSwitchType::from_flag("0"), None);
    }
}
