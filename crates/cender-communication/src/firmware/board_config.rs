//! Board configuration map
//!
//! TinyG answers `$$` with one `[key] description value [units]` line per
//! setting. Those lines are collected into a [`BoardConfigMap`] which is
//! consulted for axis discovery, unit and distance modes, home switches,
//! limit back-off distances and the status interval.

use cender_core::{Axis, DistanceMode, HomeSwitchType, ProtocolError, UnitMode};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

/// Status interval used until the board reports `si`
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Settings the board reports but does not accept back
const READ_ONLY_SETTINGS: [&str; 4] = ["fb", "fv", "hv", "id"];

/// One `[key] description value [units]` configuration line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSetting {
    /// Short key, e.g. `xvm`
    pub id: String,
    /// Human description, trimmed
    pub message: String,
    /// Value as reported
    pub value: String,
    /// Units or option legend, if any
    pub units: Option<String>,
}

fn config_line_regexes() -> &'static [Regex; 4] {
    static RE: OnceLock<[Regex; 4]> = OnceLock::new();
    RE.get_or_init(|| {
        // bare value, bracketed legend, rate units, short units
        let values = [
            r"([\d\.\-\w]+)(.{0})",
            r"([\d+\.]+) (?:\[)([^\]]+)(?:\])",
            r"([\d+\.]+) (\w+/\w+(?:\^\d)?)",
            r"([\d\-\.]+) (\w{2,3}).*",
        ];
        values.map(|value| {
            Regex::new(&format!(r"^\[([^\]]+)\] +([\w ]{{0,10}}[a-zA-Z ]+) {}$", value))
                .expect("invalid regex pattern")
        })
    })
}

/// Parse a configuration dump line
///
/// Returns `None` if the line is not shaped like a configuration line.
pub fn parse_config_line(line: &str) -> Option<BoardSetting> {
    let caps = config_line_regexes()
        .iter()
        .find_map(|regex| regex.captures(line))?;

    let groups: Vec<&str> = caps
        .iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .collect();

    if groups.len() < 3 {
        tracing::debug!("Incomplete config line: {}", line);
        return None;
    }

    Some(BoardSetting {
        id: groups[0].to_string(),
        message: groups[1].trim().to_string(),
        value: groups[2].to_string(),
        units: groups.get(3).map(|units| units.to_string()),
    })
}

/// Settings reported by the board, keyed by short id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardConfigMap {
    settings: BTreeMap<String, BoardSetting>,
}

impl BoardConfigMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a setting, replacing any previous value for its key
    pub fn insert(&mut self, setting: BoardSetting) {
        tracing::debug!("Config: {} {} {}", setting.id, setting.message, setting.value);
        self.settings.insert(setting.id.clone(), setting);
    }

    /// Get a setting
    pub fn get(&self, key: &str) -> Option<&BoardSetting> {
        self.settings.get(key)
    }

    /// Get the value of a setting
    pub fn value(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(|s| s.value.as_str())
    }

    /// Number of settings
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Check if no settings were received
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Iterate over settings in key order
    pub fn iter(&self) -> impl Iterator<Item = &BoardSetting> {
        self.settings.values()
    }

    /// Status report interval, from `si` in milliseconds
    pub fn status_interval(&self) -> Duration {
        self.value("si")
            .and_then(|si| si.parse::<f64>().ok())
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
            .unwrap_or(DEFAULT_STATUS_INTERVAL)
    }

    /// Axes mapped to motors 1 to 4 (`<n>ma`), without duplicates
    pub fn installed_axes(&self) -> Vec<Axis> {
        let mut axes = Vec::new();
        for motor in 1..=4 {
            let Some(value) = self.value(&format!("{}ma", motor)) else {
                continue;
            };
            match value.parse::<usize>().ok().and_then(Axis::from_index) {
                Some(axis) if !axes.contains(&axis) => axes.push(axis),
                Some(_) => {}
                None => tracing::warn!("Motor {} mapped to unknown axis {}", motor, value),
            }
        }
        axes
    }

    /// Axes every motor map entry points at, duplicates kept
    pub fn motor_axes(&self) -> Vec<Axis> {
        (1..=4)
            .filter_map(|motor| self.value(&format!("{}ma", motor)))
            .filter_map(|value| value.parse::<usize>().ok().and_then(Axis::from_index))
            .collect()
    }

    /// Unit mode (`gun`)
    pub fn units(&self) -> Option<UnitMode> {
        self.value("gun").and_then(UnitMode::from_flag)
    }

    /// Default distance mode (`gdi`)
    pub fn distance_mode(&self) -> Option<DistanceMode> {
        self.value("gdi").and_then(DistanceMode::from_flag)
    }

    /// Axes with a homing switch (`<axis>sn` or `<axis>sx` set to 1 or 3)
    pub fn home_switches(&self) -> Vec<(Axis, HomeSwitchType)> {
        let mut homes: Vec<(Axis, HomeSwitchType)> = Vec::new();
        for axis in Axis::ALL {
            for postfix in ["sn", "sx"] {
                let key = format!("{}{}", axis.letter(), postfix);
                if let Some(switch_type) = self.value(&key).and_then(HomeSwitchType::from_flag) {
                    if !homes.iter().any(|(a, _)| *a == axis) {
                        homes.push((axis, switch_type));
                    }
                }
            }
        }
        homes
    }

    /// Latch back-off distance (`<axis>lb`), if positive
    pub fn latch_backoff(&self, axis: Axis) -> Option<&str> {
        self.value(&format!("{}lb", axis.letter()))
            .filter(|value| value.parse::<f64>().map(|v| v > 0.0).unwrap_or(false))
    }

    /// Zero back-off distance (`<axis>zb`)
    pub fn zero_backoff(&self, axis: Axis) -> Option<&str> {
        self.value(&format!("{}zb", axis.letter()))
    }

    /// Writable settings as `$id=value (message)` lines, in key order
    pub fn export_settings(&self) -> Vec<String> {
        self.settings
            .values()
            .filter(|s| !READ_ONLY_SETTINGS.contains(&s.id.as_str()))
            .map(|s| format!("${}={} ({})", s.id, s.value, s.message))
            .collect()
    }

    /// File name for an export, e.g. `2024-01-31_12:00:00_tinyg-440.20-2X2660-FHZ.config`
    pub fn export_file_name(&self, now: &NaiveDateTime) -> Result<String, ProtocolError> {
        let required = |key: &str| {
            self.value(key).ok_or_else(|| ProtocolError::MissingBoardSetting {
                key: key.to_string(),
            })
        };
        let build = required("fb")?;
        let id = required("id")?;

        Ok(format!(
            "{}_tinyg-{}-{}.config",
            now.format("%Y-%m-%d_%H:%M:%S"),
            build,
            id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_from(lines: &[&str]) -> BoardConfigMap {
        let mut map = BoardConfigMap::new();
        for line in lines {
            if let Some(setting) = parse_config_line(line) {
                map.insert(setting);
            }
        }
        map
    }

    #[test]
    fn test_parse_value_with_units() {
        let setting = parse_config_line("[xvm] x velocity maximum  800.000 mm/min").unwrap();
        assert_eq!(setting.id, "xvm");
        assert_eq!(setting.message, "x velocity maximum");
        assert_eq!(setting.value, "800.000");
        assert_eq!(setting.units.as_deref(), Some("mm/min"));
    }

    #[test]
    fn test_parse_bare_value() {
        let setting = parse_config_line("[id]  TinyG ID                    2X2660-FHZ").unwrap();
        assert_eq!(setting.id, "id");
        assert_eq!(setting.message, "TinyG ID");
        assert_eq!(setting.value, "2X2660-FHZ");
        assert_eq!(setting.units, None);
    }

    #[test]
    fn test_parse_bracketed_legend() {
        let setting = parse_config_line("[1ma] m1 map to axis         0 [0=X,1=Y,2=Z...]").unwrap();
        assert_eq!(setting.id, "1ma");
        assert_eq!(setting.value, "0");
        assert_eq!(setting.units.as_deref(), Some("0=X,1=Y,2=Z..."));
    }

    #[test]
    fn test_parse_short_units_with_trailer() {
        let setting =
            parse_config_line("[xjh] x jerk homing     20000000 mm/min^3 (larger is faster)")
                .unwrap();
        assert_eq!(setting.id, "xjh");
        assert_eq!(setting.value, "20000000");
        assert_eq!(setting.units.as_deref(), Some("mm"));

        let setting = parse_config_line("[si]  status interval          100 ms").unwrap();
        assert_eq!(setting.value, "100");
        assert_eq!(setting.units.as_deref(), Some("ms"));
    }

    #[test]
    fn test_non_config_lines() {
        assert!(parse_config_line("{\"sr\":{\"posx\":1}}").is_none());
        assert!(parse_config_line("ok").is_none());
        assert!(parse_config_line("").is_none());
    }

    #[test]
    fn test_status_interval() {
        assert_eq!(BoardConfigMap::new().status_interval(), DEFAULT_STATUS_INTERVAL);
        let map = map_from(&["[si]  status interval          100 ms"]);
        assert_eq!(map.status_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_discovery() {
        let map = map_from(&[
            "[1ma] m1 map to axis         0 [0=X,1=Y,2=Z...]",
            "[2ma] m2 map to axis         1 [0=X,1=Y,2=Z...]",
            "[3ma] m3 map to axis         1 [0=X,1=Y,2=Z...]",
            "[4ma] m4 map to axis         2 [0=X,1=Y,2=Z...]",
            "[gun] default gcode units mode  1 [0=inch,1=mm]",
            "[gdi] default gcode distance mode  0 [0=G90,1=G91]",
            "[xsn] x switch min           3 [0=off,1=homing,2=limit,3=limit+homing]",
            "[xsx] x switch max           1 [0=off,1=homing,2=limit,3=limit+homing]",
            "[ysn] y switch min           0 [0=off,1=homing,2=limit,3=limit+homing]",
        ]);

        assert_eq!(map.installed_axes(), vec![Axis::X, Axis::Y, Axis::Z]);
        assert_eq!(map.motor_axes().len(), 4);
        assert_eq!(map.units(), Some(UnitMode::Metric));
        assert_eq!(map.distance_mode(), Some(DistanceMode::Absolute));
        assert_eq!(map.home_switches(), vec![(Axis::X, HomeSwitchType::HomingAndLimit)]);
    }

    #[test]
    fn test_export() {
        let map = map_from(&[
            "[fb]  firmware build            440.20",
            "[id]  TinyG ID                    2X2660-FHZ",
            "[xvm] x velocity maximum  800.000 mm/min",
            "[si]  status interval          100 ms",
        ]);

        assert_eq!(
            map.export_settings(),
            vec![
                "$si=100 (status interval)".to_string(),
                "$xvm=800.000 (x velocity maximum)".to_string(),
            ]
        );

        let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(12, 0, 5)
            .unwrap();
        assert_eq!(
            map.export_file_name(&now).unwrap(),
            "2024-01-31_12:00:05_tinyg-440.20-2X2660-FHZ.config"
        );
        assert!(BoardConfigMap::new().export_file_name(&now).is_err());
    }
}
