//! Calculations that are run at each tick during operation.
//!
//! The PID controller owns its integration state. Its tuning (gains and setpoint)
//! lives in a shared `TuningHandle` so that the presentation layer can retune the
//! loop while it runs without the worker ever observing a partial update.
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

mod pid;
mod tuning;

pub use pid::{ControllerState, Pid};
pub use tuning::{Gains, TuningHandle};

/// Closed interval that every actuator command is clamped into
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct OutputBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for OutputBounds {
    /// Current limits of the power supply channel, in amps
    fn default() -> Self {
        Self { min: 0.0, max: 5.0 }
    }
}

impl OutputBounds {
    pub fn new(min: f64, max: f64) -> Result<Self, ConfigurationError> {
        let bounds = Self { min, max };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Check that this is an ordered, finite interval
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min.is_finite() && self.max.is_finite() && self.min <= self.max {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidBounds {
                min: self.min,
                max: self.max,
            })
        }
    }

    /// Restrict a value to the interval.
    /// NaN maps to the lower bound so that an undefined output de-energizes the coil.
    pub fn clamp(&self, v: f64) -> f64 {
        if v.is_nan() {
            return self.min;
        }
        v.max(self.min).min(self.max)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}
