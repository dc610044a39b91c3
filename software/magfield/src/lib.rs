//! Closed-loop magnetic field control.
//!
//! A background worker reads a field sensor, computes a coil current with a PID
//! controller, and commands a programmable power supply once per tick.
//! The presentation layer drives it through [`FieldController`]: start and stop,
//! retune, read the latest values and the bounded sample history, and export.

pub mod calc;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod peripheral;

pub use controller::{
    ControlLoop, ControllerCtx, FieldController, LoopState, OperatorInput, RunEvent,
};
pub use dispatcher::{Dispatcher, Sample, SampleHistory};
pub use error::{ActuatorError, ConfigurationError, ControlError, RunFault, SensorError};
