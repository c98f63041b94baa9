//! Communication layer
//!
//! Everything between the controller and the wire:
//! - serial port access and enumeration
//! - the line transport shared by the reader and both senders
//! - command queue senders with pause and flow gating
//! - outgoing command filtering and progress counting

pub mod filter;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod sender;
pub mod serial;
pub mod transport;

pub use filter::{count, count_all, CommandFilter};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockSerialPort;
pub use sender::{CommandSender, FlowSignal, SenderSlot};
pub use serial::{is_valid_cnc_port, list_ports, RealSerialPort, SerialPort, SerialPortInfo};
pub use transport::{LineTransport, ReadLoopExit};
