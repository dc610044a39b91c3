//! Korad/Tenma programmable supply command set over a serial port.
//!
//! Commands are unterminated ASCII (`RCL1`, `VSET1:30.00`, `ISET1:1.500`, `SAV1`).
//! The instrument numbers channels and memories from 1.

use std::io::Write;
use std::thread;
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use super::{CommandLink, LinkOpener};

/// An open serial connection to a Korad supply.
/// The port is closed when the link is dropped.
pub struct KoradLink {
    port: Box<dyn SerialPort>,
    settle: Duration,
}

impl KoradLink {
    pub fn new(port: Box<dyn SerialPort>, settle: Duration) -> Self {
        Self { port, settle }
    }

    fn send(&mut self, cmd: &str) -> Result<(), String> {
        debug!("Supply <- {cmd}");
        self.port
            .write_all(cmd.as_bytes())
            .and_then(|_| self.port.flush())
            .map_err(|e| format!("Failed to write `{cmd}`: {e}"))?;

        // The supply drops commands that arrive back-to-back
        thread::sleep(self.settle);
        Ok(())
    }
}

/// Command strings, from zero-based instrument indices
fn recall_cmd(slot: u8) -> String {
    format!("RCL{}", slot as u16 + 1)
}

fn save_cmd(slot: u8) -> String {
    format!("SAV{}", slot as u16 + 1)
}

fn vset_cmd(channel: u8, volts: f64) -> String {
    format!("VSET{}:{:05.2}", channel as u16 + 1, volts)
}

fn iset_cmd(channel: u8, amps: f64) -> String {
    format!("ISET{}:{:05.3}", channel as u16 + 1, amps)
}

impl CommandLink for KoradLink {
    fn recall(&mut self, slot: u8) -> Result<(), String> {
        self.send(&recall_cmd(slot))
    }

    fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<(), String> {
        self.send(&vset_cmd(channel, volts))
    }

    fn set_current(&mut self, channel: u8, amps: f64) -> Result<(), String> {
        self.send(&iset_cmd(channel, amps))
    }

    fn save(&mut self, slot: u8) -> Result<(), String> {
        self.send(&save_cmd(slot))
    }
}

/// Opens a Korad link on a named serial port
#[derive(Debug, Clone)]
pub struct KoradOpener {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    settle: Duration,
}

impl KoradOpener {
    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_owned(),
            baud_rate,
            timeout: Duration::from_millis(500),
            settle: Duration::from_millis(50),
        }
    }

    /// Delay after each command before the next may be sent
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

impl LinkOpener for KoradOpener {
    fn open(&mut self) -> Result<Box<dyn CommandLink>, String> {
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| format!("Failed to open supply port {}: {e}", self.path))?;
        Ok(Box::new(KoradLink::new(port, self.settle)))
    }
}
