//! Scripted in-memory serial port
//!
//! Stands in for hardware in tests. Clones share the same buffers, so a
//! test can keep one handle while the transport owns another. Built for the
//! crate's own tests and behind the `test-utils` feature.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::serial::SerialPort;

type Responder = Box<dyn Fn(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    partial: Vec<u8>,
    fail_writes: bool,
    fail_reads: bool,
    max_write: Option<usize>,
    closed: bool,
    responder: Option<Responder>,
}

/// In-memory serial port
#[derive(Clone, Default)]
pub struct MockSerialPort {
    state: Arc<Mutex<MockState>>,
}

impl MockSerialPort {
    /// Create an empty port
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a line for the reader, terminated with `\n`
    pub fn push_line(&self, line: &str) {
        let mut state = self.state.lock();
        state.incoming.extend(line.as_bytes());
        state.incoming.push_back(b'\n');
    }

    /// Queue raw bytes for the reader
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state.lock().incoming.extend(bytes);
    }

    /// Reply to every written line with the lines `responder` returns
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str) -> Vec<String> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make subsequent reads fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Accept at most `bytes` per write call, like a device with a small buffer
    pub fn set_max_write(&self, bytes: usize) {
        self.state.lock().max_write = Some(bytes.max(1));
    }

    /// Every complete line written so far, without terminators
    pub fn written_lines(&self) -> Vec<String> {
        let state = self.state.lock();
        String::from_utf8_lossy(&state.written)
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Forget everything written so far
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Check if the port was closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl SerialPort for MockSerialPort {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }

        let data = match state.max_write {
            Some(max) => &data[..data.len().min(max)],
            None => data,
        };
        state.written.extend_from_slice(data);

        // Feed completed lines to the responder
        state.partial.extend_from_slice(data);
        while let Some(pos) = state.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = state.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
            let replies = state
                .responder
                .as_ref()
                .map(|responder| responder(&line))
                .unwrap_or_default();
            for reply in replies {
                state.incoming.extend(reply.as_bytes());
                state.incoming.push_back(b'\n');
            }
        }

        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "read failed"));
        }
        let count = buf.len().min(state.incoming.len());
        for slot in buf.iter_mut().take(count) {
            if let Some(byte) = state.incoming.pop_front() {
                *slot = byte;
            }
        }
        Ok(count)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "read failed"));
        }
        Ok(state.incoming.len() as u32)
    }

    fn name(&self) -> String {
        "mock".to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_lines_and_responder() {
        let handle = MockSerialPort::new();
        handle.set_responder(|line| {
            if line == "$fv" {
                vec!["[fv]  firmware version 0.97".to_string()]
            } else {
                Vec::new()
            }
        });

        let mut port = handle.clone();
        port.write(b"$f").unwrap();
        assert_eq!(port.bytes_to_read().unwrap(), 0);
        port.write(b"v\nG0 X1\n").unwrap();

        assert_eq!(handle.written_lines(), vec!["$fv", "G0 X1"]);
        assert_eq!(port.bytes_to_read().unwrap(), 28);

        let mut buf = [0u8; 64];
        let n = port.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"[fv]  firmware version 0.97\n");
    }
}
