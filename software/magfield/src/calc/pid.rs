//! A PID controller with saturation of the integral term for anti-windup

use std::time::Duration;

use super::{OutputBounds, TuningHandle};

/// Integration state of the controller.
/// Cleared only by an explicit reset, never by a change of gains.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControllerState {
    pub integral: f64,
    /// `None` until the first computation, so that the first derivative is zero
    pub last_error: Option<f64>,
}

/// A PID controller with simple saturation for anti-windup
/// and a clamped output.
#[derive(Debug)]
pub struct Pid {
    tuning: TuningHandle,
    bounds: OutputBounds,
    dt_s: f64,

    // Internal state
    state: ControllerState,
}

impl Pid {
    pub fn new(tuning: TuningHandle, bounds: OutputBounds, dt: Duration) -> Self {
        assert!(!dt.is_zero(), "dt of {dt:?} provided. dt must be > 0");

        Self {
            tuning,
            bounds,
            dt_s: dt.as_secs_f64(),
            state: ControllerState::default(),
        }
    }

    pub fn tuning(&self) -> &TuningHandle {
        &self.tuning
    }

    pub fn bounds(&self) -> OutputBounds {
        self.bounds
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Clear integral and last error
    pub fn reset(&mut self) {
        self.state = ControllerState::default();
    }

    /// Get the next clamped output for a measurement taken one tick after the last.
    pub fn compute(&mut self, measurement: f64) -> f64 {
        if self.tuning.take_reset() {
            self.reset();
        }

        // Snapshot tuning once so the whole computation sees one consistent set
        let gains = self.tuning.gains();
        let setpoint = self.tuning.setpoint();

        // Don't let a bad reading poison the integral
        if !measurement.is_finite() {
            return self.bounds.min;
        }

        let err = setpoint - measurement;
        let last_err = self.state.last_error.unwrap_or(err);
        let derivative = (err - last_err) / self.dt_s;
        self.state.last_error = Some(err);
        self.state.integral += err * self.dt_s;

        // Anti-windup saturation: the integral term alone never leaves the output bounds
        if gains.ki != 0.0 {
            let a = self.bounds.min / gains.ki;
            let b = self.bounds.max / gains.ki;
            self.state.integral = self.state.integral.max(a.min(b)).min(a.max(b));
        }

        let y = gains.kp * err + gains.ki * self.state.integral + gains.kd * derivative;
        self.bounds.clamp(y)
    }
}
