//! Control loop and the run handle that owns it.
//!
//! Each tick reads the field, computes a coil current command, applies it,
//! and dispatches the resulting sample to the data pipeline.

pub mod context;
mod handle;
mod lifecycle;
mod operator;
mod timing;

use std::time::Instant;

use tracing::{error, info, warn};

use crate::calc::Pid;
use crate::dispatcher::{Dispatcher, Sample};
use crate::error::RunFault;
use crate::peripheral::{ActuatorPort, Command, SensorPort};
pub use context::ControllerCtx;
pub use handle::FieldController;
pub use lifecycle::{Lifecycle, LoopState};
pub use operator::OperatorInput;
use timing::TickClock;

/// Notification of a change in the run state, delivered to the presentation layer
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    /// The worker picked up a new run
    Started,

    /// The run ended on request
    Stopped,

    /// The run ended on a transport fault or timeout
    Terminated(RunFault),
}

/// The single-threaded body of the control loop.
///
/// Owns the instrument ports and the controller state;
/// only tuning is shared with other threads.
pub struct ControlLoop {
    sensor: Box<dyn SensorPort>,
    actuator: Box<dyn ActuatorPort>,
    pid: Pid,
    dispatchers: Vec<Box<dyn Dispatcher>>,

    /// Reference time for sample timestamps, kept across runs
    epoch: Instant,
}

impl ControlLoop {
    pub fn new(sensor: Box<dyn SensorPort>, actuator: Box<dyn ActuatorPort>, pid: Pid) -> Self {
        Self {
            sensor,
            actuator,
            pid,
            dispatchers: Vec::new(),
            epoch: Instant::now(),
        }
    }

    /// Register a data pipeline dispatcher
    pub fn add_dispatcher(&mut self, dispatcher: Box<dyn Dispatcher>) {
        self.dispatchers.push(dispatcher);
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Run one read-compute-apply cycle and dispatch the resulting sample.
    ///
    /// Sensor noise is absorbed by the sensor port, so any error returned here
    /// ends the run. No sample is produced by a failed tick.
    pub fn tick(&mut self) -> Result<Sample, RunFault> {
        let elapsed_s = self.epoch.elapsed().as_secs_f64();

        let reading = self.sensor.read_field()?;
        let command = Command::new(self.pid.compute(reading.tesla()));
        self.actuator.apply(command)?;

        let sample = Sample {
            elapsed_s,
            voltage: self.actuator.rail_voltage(),
            current: command.amps(),
            field: reading.tesla(),
        };

        for dispatcher in self.dispatchers.iter_mut() {
            if let Err(e) = dispatcher.consume(&sample) {
                warn!("Dispatcher failed to consume sample: {e}");
            }
        }

        Ok(sample)
    }

    /// Tick at a fixed rate until a stop is requested or a tick fails.
    ///
    /// A stop is only observed between ticks, so an in-flight
    /// supply transaction always completes before the run ends.
    pub(crate) fn run(
        &mut self,
        ctx: &ControllerCtx,
        lifecycle: &Lifecycle,
    ) -> Result<(), RunFault> {
        info!("Initializing dispatchers");
        for dispatcher in self.dispatchers.iter_mut() {
            if let Err(e) = dispatcher.init(ctx) {
                warn!("Failed to initialize dispatcher: {e}");
            }
        }

        let mut clock = TickClock::new(ctx.tick_interval());
        let mut ticks: u64 = 0;
        let result = loop {
            if lifecycle.stop_requested() {
                break Ok(());
            }

            if let Err(fault) = self.tick() {
                error!("Ending run after {ticks} ticks: {fault}");
                break Err(fault);
            }
            ticks += 1;

            if lifecycle.wait_for_stop(clock.until_next()) {
                break Ok(());
            }
        };

        if clock.overruns() > 0 {
            warn!("{} of {ticks} ticks overran their deadline", clock.overruns());
        }

        for dispatcher in self.dispatchers.iter_mut() {
            if let Err(e) = dispatcher.terminate() {
                warn!("Failed to terminate dispatcher: {e}");
            }
        }

        result
    }
}

/// Pin the current thread to the first core and raise its priority, if the platform allows
#[cfg(feature = "affinity")]
pub(crate) fn pin_current_thread() {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    // The first core is more likely to be a high-performance core on a heterogeneous device
    if let Some(core) = core_ids.first() {
        if !core_affinity::set_for_current(*core) {
            warn!("Failed to pin control loop to core {}", core.id);
        }
    }

    if let Err(e) =
        thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max)
    {
        warn!("Failed to raise control loop priority: {e:?}");
    }
}
