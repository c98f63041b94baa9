use cender_core::{Axis, BoardType};
use cender_settings::{Config, FlowControl, Parity};
use tempfile::TempDir;

#[test]
fn test_toml_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.connection.port = "/dev/ttyACM1".to_string();
    config.connection.parity = Parity::Even;
    config.connection.flow_control = FlowControl::Xonxoff;
    config.common.board_type = BoardType::TinyG096;
    config.set_last_position(Axis::Z, -3.25);

    config.save_to_file(&path).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_json_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::default();
    config.machine.file_precision = 3;
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"file_precision\": 3"));
    assert!(text.contains("\"tinyg-0.97\""));

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.machine.file_precision, 3);
}

#[test]
fn test_load_or_default_persists_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    assert!(!path.exists());

    let config = Config::load_or_default(&path).unwrap();
    assert_eq!(config, Config::default());
    assert!(path.exists());

    let reloaded = Config::load_or_default(&path).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn test_unknown_extension_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.ini");
    assert!(Config::default().save_to_file(&path).is_err());
}

#[test]
fn test_invalid_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[connection]\nbaud_rate = 0\n").unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("connection.baud_rate"));
}
