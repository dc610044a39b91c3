//! Configuration of the current operation
//! that may be used by the controller's appendages.

use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::calc::{Gains, OutputBounds};
use crate::error::ConfigurationError;

/// Operation context for the field controller.
///
/// Every field has a default, so a config file only needs to name what differs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct ControllerCtx {
    /// Serial port of the power supply
    pub serial_port: String,

    /// Serial port of the field sensor's telemetry stream
    pub sensor_port: String,

    pub supply_baud_rate: u32,

    pub sensor_baud_rate: u32,

    /// Zero-based output channel of the supply
    pub channel: u8,

    /// Zero-based memory preset of the supply that each command recalls and saves
    pub memory_slot: u8,

    /// Number of samples retained for display and export
    pub capacity: usize,

    /// Control tick period in nanoseconds
    pub dt_ns: u32,

    /// Range that the coil current command is clamped into, in amps
    pub output_bounds: OutputBounds,

    /// Voltage rail the supply is held at, in volts
    pub max_voltage: f64,

    /// Give up on a sensor read after this long. `None` waits indefinitely.
    pub sensor_timeout_ms: Option<u64>,

    /// Gains in effect at startup
    pub gains: Gains,

    /// Target field at startup, in tesla
    pub setpoint: f64,

    /// A name for this op,
    /// which will be used as the name of the log file and default export file
    /// and must be compatible with that use.
    pub op_name: String,

    /// A directory to place outputs.
    pub op_dir: PathBuf,
}

impl Default for ControllerCtx {
    fn default() -> Self {
        // Use current time with seconds as op name and use working directory as op dir,
        // replacing characters in the name that would be invalid on Windows.
        let op_name = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            serial_port: "/dev/ttyACM0".to_owned(),
            sensor_port: "/dev/ttyUSB0".to_owned(),
            supply_baud_rate: 9600,
            sensor_baud_rate: 115_200,
            channel: 0,
            memory_slot: 0,
            capacity: 100,
            dt_ns: 100_000_000,
            output_bounds: OutputBounds::default(),
            max_voltage: 30.0,
            sensor_timeout_ms: Some(1000),
            gains: Gains::default(),
            setpoint: 1.0,
            op_name,
            op_dir: std::fs::canonicalize("./").unwrap_or_default(),
        }
    }
}

impl ControllerCtx {
    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Read(format!("{}: {e}", path.display())))?;
        let ctx: Self = serde_json::from_str(&text)
            .map_err(|e| ConfigurationError::Parse(format!("{}: {e}", path.display())))?;
        ctx.validate()?;
        Ok(ctx)
    }

    /// Write this config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigurationError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigurationError::Write(format!("{}: {e}", path.display())))?;
        std::fs::write(path, text)
            .map_err(|e| ConfigurationError::Write(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.capacity == 0 {
            return Err(ConfigurationError::ZeroCapacity);
        }
        if self.dt_ns == 0 {
            return Err(ConfigurationError::ZeroTickInterval);
        }
        self.output_bounds.validate()?;
        self.gains.validate()?;
        if !self.setpoint.is_finite() {
            return Err(ConfigurationError::NonFinite { field: "setpoint" });
        }
        if !self.max_voltage.is_finite() {
            return Err(ConfigurationError::NonFinite {
                field: "max_voltage",
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(self.dt_ns as u64)
    }

    pub fn sensor_timeout(&self) -> Option<Duration> {
        self.sensor_timeout_ms.map(Duration::from_millis)
    }

    /// Default location for exported samples
    pub fn export_path(&self) -> PathBuf {
        self.op_dir.join(format!("{}.csv", self.op_name))
    }
}
