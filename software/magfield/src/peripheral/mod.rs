//! Peripherals are the instruments on either side of the loop:
//! a programmable power supply that drives the coil, and a field sensor
//! that reports telemetry lines.
//!
//! The controller only depends on the `SensorPort` and `ActuatorPort` capabilities.
//! Concrete implementations are built from a transport (`LineSource` for telemetry,
//! `LinkOpener` for supply commands) so that hardware and simulated transports
//! share the same decode and transaction logic.
use core::fmt::Debug;

use crate::error::{ActuatorError, SensorError};

mod actuator;
mod korad;
pub mod mockup;
mod sensor;
mod serial_line;

pub use actuator::SupplyActuator;
pub use korad::{KoradLink, KoradOpener};
pub use sensor::{LineSensor, parse_line};
pub use serial_line::SerialLineSource;

/// A field strength in final physical units (tesla)
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct FieldReading(pub f64);

impl FieldReading {
    pub fn tesla(&self) -> f64 {
        self.0
    }
}

/// Coil current requested from the supply, in amps.
/// Produced once per tick by the controller and consumed immediately.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command(f64);

impl Command {
    pub fn new(amps: f64) -> Self {
        Self(amps)
    }

    pub fn amps(&self) -> f64 {
        self.0
    }
}

/// Source of field readings, from the perspective of the controller.
pub trait SensorPort: Send {
    /// Wait for the next fresh reading.
    ///
    /// Stale buffered telemetry is discarded first. Undecodable and non-numeric
    /// lines are skipped; only transport failures and timeouts are returned.
    fn read_field(&mut self) -> Result<FieldReading, SensorError>;
}

/// Sink for coil current commands, from the perspective of the controller.
pub trait ActuatorPort: Send {
    /// Apply a pre-clamped command as a single instrument transaction.
    ///
    /// Out-of-range commands are rejected before any I/O.
    /// After a transport error the instrument state is unknown.
    fn apply(&mut self, command: Command) -> Result<(), ActuatorError>;

    /// Voltage rail the supply is held at while current-limited
    fn rail_voltage(&self) -> f64;
}

/// Line-oriented telemetry channel
pub trait LineSource: Send {
    /// Discard everything received so far, including any partial line
    fn clear_input(&mut self) -> Result<(), String>;

    /// Get the next complete line (without its terminator) if one is available.
    /// `Ok(None)` means nothing is available yet.
    fn poll_line(&mut self) -> Result<Option<Vec<u8>>, String>;
}

/// An open command connection to the power supply.
/// Channel and memory slot are zero-based instrument indices.
///
/// The connection is released when the link is dropped.
pub trait CommandLink: Send {
    fn recall(&mut self, slot: u8) -> Result<(), String>;

    fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<(), String>;

    fn set_current(&mut self, channel: u8, amps: f64) -> Result<(), String>;

    fn save(&mut self, slot: u8) -> Result<(), String>;
}

/// Opens a fresh command connection to the power supply
pub trait LinkOpener: Send + Debug {
    fn open(&mut self) -> Result<Box<dyn CommandLink>, String>;
}
