//! # Cender Communication
//!
//! Serial protocol engine for TinyG motion controllers.
//!
//! - [`communication`]: serial ports, the line transport, command filtering
//!   and the paced command senders
//! - [`firmware`]: board protocol, response parsing and command formatting
//! - [`controller`]: [`ControllerBoard`], which ties the two together and
//!   publishes everything it learns on an event bus

pub mod communication;
pub mod controller;
pub mod firmware;

pub use communication::{
    is_valid_cnc_port, list_ports, CommandFilter, LineTransport, RealSerialPort, SerialPort,
    SerialPortInfo,
};
#[cfg(any(test, feature = "test-utils"))]
pub use communication::MockSerialPort;
pub use controller::{BackoffStage, BoardState, ControllerBoard};
pub use firmware::{parser_for, formatter_for, BoardConfigMap, BoardSetting, EchoCorrelator};
