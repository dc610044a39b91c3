//! Telemetry lines from a sensor streaming over a serial port

use std::io::{ErrorKind, Read};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::info;

use super::LineSource;

/// Line source over a serial port, reassembling lines from partial reads.
pub struct SerialLineSource {
    path: String,
    port: Box<dyn SerialPort>,
    pending: LineBuffer,
}

/// Bytes received but not yet terminated by a newline
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,

    /// Set by a clear, which may cut a line in two.
    /// Everything up to the next newline is the tail of that line.
    resync: bool,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.resync = true;
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Split the first complete line off the front
    fn take_line(&mut self) -> Option<Vec<u8>> {
        if self.resync {
            let Some(end) = self.bytes.iter().position(|&b| b == b'\n') else {
                self.bytes.clear();
                return None;
            };
            self.bytes.drain(..=end);
            self.resync = false;
        }

        let end = self.bytes.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.bytes.drain(..=end).collect();
        line.pop();
        Some(line)
    }
}

impl std::fmt::Debug for SerialLineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLineSource")
            .field("path", &self.path)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SerialLineSource {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, String> {
        // Short read timeout; waiting for a full line is paced by the sensor port
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| format!("Failed to open sensor port {path}: {e}"))?;
        info!("Opened sensor port {path} at {baud_rate} baud");

        Ok(Self {
            path: path.to_owned(),
            port,
            pending: LineBuffer::default(),
        })
    }
}

impl LineSource for SerialLineSource {
    fn clear_input(&mut self) -> Result<(), String> {
        self.pending.clear();
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| format!("Failed to clear sensor input on {}: {e}", self.path))
    }

    fn poll_line(&mut self) -> Result<Option<Vec<u8>>, String> {
        if let Some(line) = self.pending.take_line() {
            return Ok(Some(line));
        }

        let mut chunk = [0_u8; 256];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.pending.extend(&chunk[..n]);
                Ok(self.pending.take_line())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => Err(format!("Failed to read sensor port {}: {e}", self.path)),
        }
    }
}

impl Drop for SerialLineSource {
    fn drop(&mut self) {
        info!("Closed sensor port {}", self.path);
    }
}
