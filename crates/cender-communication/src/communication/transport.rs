//! Line transport
//!
//! Byte-level access to the serial device, assembled into newline-delimited
//! lines. Writes go through a single lock so lines from the default and
//! control senders never interleave mid-line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cender_core::{BoardEvent, ErrorEvent, EventBus, Result, TransportError};
use parking_lot::Mutex;

use super::serial::SerialPort;

/// Idle timeout expressed in poll delays
const IDLE_DELAYS: u32 = 2000;

/// Largest chunk pulled from the port per poll
const READ_CHUNK: usize = 256;

/// Why a read loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLoopExit {
    /// Stop was requested
    Stopped,
    /// No data arrived for `2000 * delay`
    IdleTimeout,
    /// The device failed or no port is attached
    IoError,
}

/// Shared line-oriented access to one serial device
pub struct LineTransport {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    stop: AtomicBool,
    bus: Arc<EventBus>,
}

impl LineTransport {
    /// Create a transport with no port attached
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            port: Mutex::new(None),
            stop: AtomicBool::new(false),
            bus,
        }
    }

    /// Attach a port, closing any previous one
    pub fn attach(&self, port: Box<dyn SerialPort>) {
        tracing::debug!("Attaching port {}", port.name());
        if let Some(mut old) = self.port.lock().replace(port) {
            let _ = old.close();
        }
    }

    /// Close and drop the port
    pub fn detach(&self) {
        if let Some(mut port) = self.port.lock().take() {
            tracing::debug!("Closing port {}", port.name());
            if let Err(e) = port.close() {
                tracing::warn!("Error closing port: {}", e);
            }
        }
    }

    /// Check if a port is attached
    pub fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    /// Write one line followed by `\n`
    ///
    /// The whole line is written under the port lock. Failures are returned
    /// and also published as a transport error event.
    pub fn write_line(&self, line: &str) -> Result<()> {
        let result = {
            let mut guard = self.port.lock();
            match guard.as_mut() {
                Some(port) => write_all(port.as_mut(), format!("{}\n", line).as_bytes()),
                None => Err(TransportError::PortClosed),
            }
        };

        result.map_err(|e| {
            let e = match e {
                TransportError::WriteFailed { reason, .. } => TransportError::WriteFailed {
                    line: line.to_string(),
                    reason,
                },
                other => other,
            };
            tracing::warn!("{}", e);
            self.bus.publish(BoardEvent::Error(ErrorEvent::TransportFailed {
                reason: e.to_string(),
            }));
            e.into()
        })
    }

    /// Ask a running read loop to exit at its next iteration
    pub fn request_stop(&self) {
        tracing::debug!("Setting exit flag");
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Read lines until stopped, idle for `2000 * delay`, or the device fails
    ///
    /// `on_line` receives every non-empty line with its terminator removed.
    pub async fn read_loop<F>(&self, delay: Duration, mut on_line: F) -> ReadLoopExit
    where
        F: FnMut(String),
    {
        let delay = delay.max(Duration::from_millis(1));
        let limit = delay * IDLE_DELAYS;
        let mut idle = Duration::ZERO;
        let mut line: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        self.stop.store(false, Ordering::SeqCst);

        let exit = loop {
            if self.stop.load(Ordering::SeqCst) {
                break ReadLoopExit::Stopped;
            }
            if idle >= limit {
                tracing::debug!("No data for {:?}", limit);
                break ReadLoopExit::IdleTimeout;
            }

            let read = {
                let mut guard = self.port.lock();
                match guard.as_mut() {
                    None => Err("no port attached".to_string()),
                    Some(port) => match port.bytes_to_read() {
                        Ok(0) => Ok(0),
                        Ok(available) => {
                            let wanted = (available as usize).min(READ_CHUNK);
                            port.read(&mut chunk[..wanted]).map_err(|e| e.to_string())
                        }
                        Err(e) => Err(e.to_string()),
                    },
                }
            };

            match read {
                Ok(0) => {
                    idle += delay;
                    tokio::time::sleep(delay).await;
                }
                Ok(count) => {
                    for byte in &chunk[..count] {
                        if *byte == b'\r' || *byte == b'\n' {
                            if !line.is_empty() {
                                let text = String::from_utf8_lossy(&line).to_string();
                                tracing::trace!("Received line: {}", text);
                                on_line(text);
                                line.clear();
                            }
                        } else {
                            line.push(*byte);
                            idle = Duration::ZERO;
                        }
                    }
                    tokio::task::yield_now().await;
                }
                Err(reason) => {
                    tracing::warn!("Read failed: {}", reason);
                    self.bus.publish(BoardEvent::Error(ErrorEvent::TransportFailed {
                        reason: TransportError::ReadFailed { reason }.to_string(),
                    }));
                    break ReadLoopExit::IoError;
                }
            }
        };

        tracing::info!("Listener exiting ({:?})", exit);
        exit
    }
}

fn write_all(port: &mut dyn SerialPort, mut data: &[u8]) -> std::result::Result<(), TransportError> {
    let failed = |reason: String| TransportError::WriteFailed {
        line: String::new(),
        reason,
    };

    while !data.is_empty() {
        match port.write(data) {
            Ok(0) => return Err(failed("device accepted no bytes".to_string())),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(failed(e.to_string())),
        }
    }
    port.flush().map_err(|e| failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::mock::MockSerialPort;

    #[test]
    fn test_write_without_port() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.receiver();
        let transport = LineTransport::new(bus);

        assert!(transport.write_line("G0 X1").is_err());
        match rx.try_recv() {
            Ok(BoardEvent::Error(ErrorEvent::TransportFailed { reason })) => {
                assert_eq!(reason, "Port closed")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_write_appends_newline() {
        let port = MockSerialPort::new();
        let transport = LineTransport::new(Arc::new(EventBus::new()));
        transport.attach(Box::new(port.clone()));

        transport.write_line("$ee=0").unwrap();
        transport.write_line("G0 X1").unwrap();
        assert_eq!(port.written_lines(), vec!["$ee=0", "G0 X1"]);
    }
}
