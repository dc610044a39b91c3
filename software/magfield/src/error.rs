//! Error types for configuration, instrument I/O, and loop control

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Invalid operator- or file-supplied configuration.
///
/// Rejected input never replaces the value already in effect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("`{field}` is not a number: {text:?}")]
    NotANumber { field: &'static str, text: String },

    #[error("`{field}` must be finite")]
    NonFinite { field: &'static str },

    #[error("Output bounds [{min}, {max}] are not an ordered finite interval")]
    InvalidBounds { min: f64, max: f64 },

    #[error("History capacity must be at least 1")]
    ZeroCapacity,

    #[error("Tick interval must be nonzero")]
    ZeroTickInterval,

    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Failed to write config file: {0}")]
    Write(String),
}

/// Failure to produce a field reading.
///
/// `Decode` and `Parse` are recovered inside the sensor port by moving on to the
/// next line and are only returned by single-line helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Sensor transport error: {0}")]
    Transport(String),

    #[error("Sensor line is not valid UTF-8: {0}")]
    Decode(String),

    #[error("Sensor line is not a number: {0}")]
    Parse(String),

    #[error("No sensor line received within {0:?}")]
    Timeout(Duration),
}

/// Failure to apply a command to the power supply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    /// Rejected before any I/O was attempted
    #[error("Command {value} A is outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// The instrument state after this error is unknown
    #[error("Actuator transport error: {0}")]
    Transport(String),
}

/// Fault that ends a run of the control loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunFault {
    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

/// Errors returned to the presentation layer by the run handle.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control loop is already running")]
    AlreadyRunning,

    #[error("Sensor and actuator ports were lost by a previous run")]
    PortsUnavailable,

    #[error("Control loop worker panicked")]
    WorkerPanicked,

    #[error("Failed to spawn control loop worker: {0}")]
    Spawn(io::Error),

    #[error("Failed to open instrument: {0}")]
    Open(String),

    #[error("Failed to export samples: {0}")]
    Export(#[from] io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
