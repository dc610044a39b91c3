//! Run handle used by the presentation layer.
//!
//! The presentation layer never touches the instruments. It starts and stops
//! the worker, retunes the controller, and reads what the worker published.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{info, warn};

use super::lifecycle::IdleGuard;
use super::{ControlLoop, ControllerCtx, Lifecycle, LoopState, OperatorInput, RunEvent};
use crate::calc::{Gains, Pid, TuningHandle};
use crate::dispatcher::{
    Dispatcher, HistoryDispatcher, HistoryHandle, LatestValueDispatcher, LatestValueHandle,
    Readout, Sample, SampleHistory, Series,
};
use crate::error::{ConfigurationError, ControlError};
use crate::logging::init_logging;
use crate::peripheral::{
    ActuatorPort, KoradOpener, LineSensor, SensorPort, SerialLineSource, SupplyActuator,
};

/// Run notifications retained for a listener that isn't keeping up
pub const EVENT_CAPACITY: usize = 64;

/// Queue a notification. If the queue is full, the oldest notification is dropped.
fn notify(tx: &Sender<RunEvent>, rx: &Receiver<RunEvent>, event: RunEvent) {
    let mut event = event;
    loop {
        match tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(e)) => {
                let _ = rx.try_recv();
                event = e;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// A control loop on its way to a worker thread.
/// If the worker never runs, the loop stays here to be taken back.
#[derive(Clone)]
struct Handoff(Arc<Mutex<Option<ControlLoop>>>);

impl Handoff {
    fn new(control_loop: ControlLoop) -> Self {
        Self(Arc::new(Mutex::new(Some(control_loop))))
    }

    fn take(&self) -> Option<ControlLoop> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

/// Owns the control loop between runs and the worker thread during a run.
///
/// At most one worker exists at a time. The loop's ports and controller state
/// are handed to the worker on start and reclaimed when it finishes,
/// so integral state and sample timestamps carry over between runs.
pub struct FieldController {
    ctx: ControllerCtx,
    tuning: TuningHandle,
    history: HistoryHandle,
    latest: LatestValueHandle,
    lifecycle: Arc<Lifecycle>,
    events_tx: Sender<RunEvent>,
    events_rx: Receiver<RunEvent>,
    control_loop: Option<ControlLoop>,
    worker: Option<JoinHandle<Option<ControlLoop>>>,
}

impl FieldController {
    /// Build an idle controller around a pair of instrument ports.
    pub fn new(
        ctx: ControllerCtx,
        sensor: Box<dyn SensorPort>,
        actuator: Box<dyn ActuatorPort>,
    ) -> Result<Self, ConfigurationError> {
        ctx.validate()?;

        let tuning = TuningHandle::new(ctx.gains, ctx.setpoint);
        let pid = Pid::new(tuning.clone(), ctx.output_bounds, ctx.tick_interval());
        let history = HistoryHandle::new(SampleHistory::new(ctx.capacity)?);
        let (latest_dispatcher, latest) = LatestValueDispatcher::new();

        let mut control_loop = ControlLoop::new(sensor, actuator, pid);
        control_loop.add_dispatcher(Box::new(HistoryDispatcher::new(history.clone())));
        control_loop.add_dispatcher(Box::new(latest_dispatcher));

        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);

        Ok(Self {
            ctx,
            tuning,
            history,
            latest,
            lifecycle: Arc::new(Lifecycle::default()),
            events_tx,
            events_rx,
            control_loop: Some(control_loop),
            worker: None,
        })
    }

    /// Build an idle controller on the serial instruments named in the context:
    /// a line-oriented field sensor and a Korad-protocol supply.
    pub fn with_serial_instruments(ctx: ControllerCtx) -> Result<Self, ControlError> {
        let source = SerialLineSource::open(&ctx.sensor_port, ctx.sensor_baud_rate)
            .map_err(ControlError::Open)?;
        let sensor = LineSensor::new(source, ctx.sensor_timeout());
        let actuator = SupplyActuator::new(
            KoradOpener::new(&ctx.serial_port, ctx.supply_baud_rate),
            ctx.channel,
            ctx.memory_slot,
            ctx.max_voltage,
            ctx.output_bounds,
        );
        Ok(Self::new(ctx, Box::new(sensor), Box::new(actuator))?)
    }

    pub fn ctx(&self) -> &ControllerCtx {
        &self.ctx
    }

    /// Register an additional data pipeline dispatcher.
    /// Only possible while idle.
    pub fn add_dispatcher(&mut self, dispatcher: Box<dyn Dispatcher>) -> Result<(), ControlError> {
        if self.lifecycle.state() != LoopState::Idle {
            return Err(ControlError::AlreadyRunning);
        }
        self.reclaim()?;
        let control_loop = self
            .control_loop
            .as_mut()
            .ok_or(ControlError::PortsUnavailable)?;
        control_loop.add_dispatcher(dispatcher);
        Ok(())
    }

    /// Join a finished worker and take back the loop it was running
    fn reclaim(&mut self) -> Result<(), ControlError> {
        if let Some(worker) = self.worker.take() {
            self.control_loop = worker.join().map_err(|_| ControlError::WorkerPanicked)?;
        }
        Ok(())
    }

    /// Start the control loop on a new worker thread.
    ///
    /// Fails with `AlreadyRunning` without side effects if a run is active,
    /// including one that has been asked to stop but has not finished its tick.
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.lifecycle.state() != LoopState::Idle {
            return Err(ControlError::AlreadyRunning);
        }
        self.reclaim()?;
        let control_loop = self
            .control_loop
            .take()
            .ok_or(ControlError::PortsUnavailable)?;

        // A run without a log file is still a run
        match init_logging(&self.ctx) {
            Ok(log_path) => info!("Logging to {}", log_path.display()),
            Err(e) => warn!("{e}"),
        }

        if let Err(e) = self.lifecycle.begin() {
            self.control_loop = Some(control_loop);
            return Err(e);
        }

        let handoff = Handoff::new(control_loop);
        let for_worker = handoff.clone();
        let lifecycle = self.lifecycle.clone();
        let (events_tx, events_rx) = (self.events_tx.clone(), self.events_rx.clone());
        let ctx = self.ctx.clone();
        let spawned = thread::Builder::new()
            .name("magfield-loop".to_owned())
            .spawn(move || {
                let guard = IdleGuard { lifecycle };
                let mut control_loop = for_worker.take()?;

                #[cfg(feature = "affinity")]
                super::pin_current_thread();

                info!("Control loop started");
                notify(&events_tx, &events_rx, RunEvent::Started);
                let result = control_loop.run(&ctx, &guard.lifecycle);

                // Idle before notifying, so a listener can restart right away
                guard.lifecycle.finish();
                let event = match result {
                    Ok(()) => {
                        info!("Control loop stopped");
                        RunEvent::Stopped
                    }
                    Err(fault) => RunEvent::Terminated(fault),
                };
                notify(&events_tx, &events_rx, event);

                Some(control_loop)
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                // The closure never ran, so the loop is still in the handoff
                self.control_loop = handoff.take();
                self.lifecycle.finish();
                Err(ControlError::Spawn(e))
            }
        }
    }

    /// Ask the loop to stop at its next tick boundary.
    /// Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let requested = self.lifecycle.request_stop();
        if requested {
            info!("Stop requested");
        }
        requested
    }

    pub fn state(&self) -> LoopState {
        self.lifecycle.state()
    }

    /// Wait for the loop to return to idle.
    /// Returns false if it was still active after `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.lifecycle.wait_idle(timeout)
    }

    /// Receiver for run notifications. Clones share one queue.
    ///
    /// At most `EVENT_CAPACITY` notifications are kept;
    /// once full, each new notification displaces the oldest.
    pub fn events(&self) -> Receiver<RunEvent> {
        self.events_rx.clone()
    }

    /// Most recent voltage, current, and field, if any tick has completed
    pub fn latest(&self) -> Option<Readout> {
        self.latest.latest()
    }

    /// Retained samples, oldest first
    pub fn history_snapshot(&self) -> Vec<Sample> {
        self.history.snapshot()
    }

    /// Retained samples split into aligned columns for plotting
    pub fn history_series(&self) -> Series {
        self.history.series()
    }

    pub fn history(&self) -> &HistoryHandle {
        &self.history
    }

    pub fn gains(&self) -> Gains {
        self.tuning.gains()
    }

    pub fn setpoint(&self) -> f64 {
        self.tuning.setpoint()
    }

    /// Replace all three gains at once. Takes effect on the next tick.
    pub fn set_gains(&self, kp: f64, ki: f64, kd: f64) -> Result<(), ConfigurationError> {
        self.tuning.set_gains(Gains::new(kp, ki, kd))
    }

    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), ConfigurationError> {
        self.tuning.set_setpoint(setpoint)
    }

    /// Apply gains and setpoint typed by the operator.
    /// On error, the values in effect are kept and the loop keeps running.
    pub fn apply_operator_input(&self, input: &OperatorInput) -> Result<(), ConfigurationError> {
        input.apply(&self.tuning).inspect_err(|e| warn!("Rejected operator input: {e}"))
    }

    /// Clear the integral and last error before the next computation
    pub fn reset_controller(&self) {
        info!("Controller reset requested");
        self.tuning.request_reset();
    }

    /// Write the retained samples to a CSV file
    pub fn export(&self, path: &Path) -> Result<(), ControlError> {
        self.history.export(path)?;
        Ok(())
    }

    /// Write the retained samples to `<op_dir>/<op_name>.csv`
    pub fn export_default(&self) -> Result<PathBuf, ControlError> {
        let path = self.ctx.export_path();
        self.export(&path)?;
        Ok(path)
    }
}

impl Drop for FieldController {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Control loop worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{RunFault, SensorError};
    use crate::peripheral::mockup::{MockupCoil, RecordingOpener, ScriptedLines};

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn full_event_queue_keeps_the_newest() {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        for _ in 0..EVENT_CAPACITY {
            notify(&tx, &rx, RunEvent::Started);
        }
        notify(&tx, &rx, RunEvent::Stopped);

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), EVENT_CAPACITY);
        assert_eq!(events.last(), Some(&RunEvent::Stopped));
    }

    #[test]
    fn loop_survives_a_worker_that_never_ran() {
        let coil = MockupCoil::default();
        let control_loop = ControlLoop::new(
            Box::new(LineSensor::new(coil.sensor(), None)),
            Box::new(SupplyActuator::new(
                coil.supply(),
                0,
                0,
                30.0,
                Default::default(),
            )),
            Pid::new(TuningHandle::default(), Default::default(), TICK),
        );

        let handoff = Handoff::new(control_loop);
        let for_worker = handoff.clone();
        let worker_body = move || for_worker.take().is_some();
        drop(worker_body);

        assert!(handoff.take().is_some());
        assert!(handoff.take().is_none());
    }

    fn test_ctx(name: &str) -> ControllerCtx {
        let op_dir = std::env::temp_dir().join(format!("magfield_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&op_dir).unwrap();
        ControllerCtx {
            dt_ns: TICK.as_nanos() as u32,
            op_name: name.to_owned(),
            op_dir,
            ..Default::default()
        }
    }

    fn mockup_controller(ctx: ControllerCtx) -> (FieldController, MockupCoil) {
        let coil = MockupCoil::default();
        let sensor = LineSensor::new(coil.sensor(), ctx.sensor_timeout());
        let actuator = SupplyActuator::new(
            coil.supply(),
            ctx.channel,
            ctx.memory_slot,
            ctx.max_voltage,
            ctx.output_bounds,
        );
        let controller = FieldController::new(ctx, Box::new(sensor), Box::new(actuator)).unwrap();
        (controller, coil)
    }

    fn wait_for_samples(controller: &FieldController, n: usize) {
        for _ in 0..500 {
            if controller.history().len() >= n {
                return;
            }
            thread::sleep(TICK);
        }
        panic!("Loop produced fewer than {n} samples");
    }

    #[test]
    fn start_stop_restart() {
        let ctx = test_ctx("start_stop_restart");
        let (mut controller, coil) = mockup_controller(ctx);
        let events = controller.events();
        assert_eq!(controller.state(), LoopState::Idle);
        assert!(!controller.stop());

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(ControlError::AlreadyRunning)));
        wait_for_samples(&controller, 3);

        assert!(controller.stop());
        assert!(controller.wait_idle(Duration::from_secs(1)));
        assert_eq!(events.recv_timeout(Duration::from_secs(1)), Ok(RunEvent::Started));
        assert_eq!(events.recv_timeout(Duration::from_secs(1)), Ok(RunEvent::Stopped));

        // Nothing is appended once idle
        let settled = controller.history_snapshot();
        thread::sleep(5 * TICK);
        assert_eq!(controller.history_snapshot(), settled);
        assert!(coil.amps() > 0.0);

        // A second run picks up the same ports and keeps the timeline increasing
        controller.start().unwrap();
        wait_for_samples(&controller, settled.len() + 3);
        assert!(controller.stop());
        assert!(controller.wait_idle(Duration::from_secs(1)));

        let samples = controller.history_snapshot();
        assert!(samples.windows(2).all(|w| w[0].elapsed_s < w[1].elapsed_s));
        let latest = controller.latest().unwrap();
        assert_eq!(latest.field, samples.last().unwrap().field);
    }

    #[test]
    fn history_is_bounded_and_aligned() {
        let mut ctx = test_ctx("history_is_bounded");
        ctx.capacity = 5;
        let (mut controller, _coil) = mockup_controller(ctx);
        controller.start().unwrap();
        wait_for_samples(&controller, 5);
        thread::sleep(5 * TICK);
        controller.stop();
        assert!(controller.wait_idle(Duration::from_secs(1)));

        let series = controller.history_series();
        assert_eq!(series.time.len(), 5);
        assert_eq!(series.voltage.len(), 5);
        assert_eq!(series.current.len(), 5);
        assert_eq!(series.field.len(), 5);
    }

    #[test]
    fn transport_fault_returns_to_idle() {
        let ctx = test_ctx("transport_fault");
        let script = ScriptedLines::new()
            .line(b"0.5")
            .fail("sensor unplugged");
        let actuator = SupplyActuator::new(
            RecordingOpener::new(),
            0,
            0,
            30.0,
            ctx.output_bounds,
        );
        let mut controller = FieldController::new(
            ctx,
            Box::new(LineSensor::new(script, None)),
            Box::new(actuator),
        )
        .unwrap();
        let events = controller.events();

        controller.start().unwrap();
        assert_eq!(events.recv_timeout(Duration::from_secs(1)), Ok(RunEvent::Started));
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(RunEvent::Terminated(RunFault::Sensor(SensorError::Transport(
                "sensor unplugged".into()
            ))))
        );
        assert!(controller.wait_idle(Duration::from_secs(1)));
        assert_eq!(controller.history_snapshot().len(), 1);

        // The ports are reclaimed, so a restart runs straight into the dead transport
        controller.start().unwrap();
        assert_eq!(events.recv_timeout(Duration::from_secs(1)), Ok(RunEvent::Started));
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(RunEvent::Terminated(_))
        ));
    }

    #[test]
    fn operator_input_while_running() {
        let ctx = test_ctx("operator_input");
        let (mut controller, _coil) = mockup_controller(ctx);
        controller.start().unwrap();

        let bad = OperatorInput {
            kp: "3",
            ki: "x",
            kd: "0",
            setpoint: "0.5",
        };
        assert!(controller.apply_operator_input(&bad).is_err());
        assert_eq!(controller.gains(), Gains::new(1.0, 0.0, 0.0));
        assert_eq!(controller.setpoint(), 1.0);
        assert_eq!(controller.state(), LoopState::Running);

        let good = OperatorInput {
            kp: "3",
            ki: "0.5",
            kd: "0",
            setpoint: "0.5",
        };
        controller.apply_operator_input(&good).unwrap();
        assert_eq!(controller.gains(), Gains::new(3.0, 0.5, 0.0));
        assert_eq!(controller.setpoint(), 0.5);

        assert!(controller.set_setpoint(f64::NAN).is_err());
        assert_eq!(controller.setpoint(), 0.5);
        controller.reset_controller();

        controller.stop();
        assert!(controller.wait_idle(Duration::from_secs(1)));
    }

    #[test]
    fn exports_to_the_op_dir() {
        let ctx = test_ctx("exports");
        let (mut controller, _coil) = mockup_controller(ctx);
        controller.start().unwrap();
        wait_for_samples(&controller, 3);
        controller.stop();
        assert!(controller.wait_idle(Duration::from_secs(1)));

        let path = controller.export_default().unwrap();
        assert_eq!(path, controller.ctx().export_path());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), controller.history().len() + 1);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn dispatchers_can_only_be_added_while_idle() {
        let ctx = test_ctx("add_dispatcher");
        let (mut controller, _coil) = mockup_controller(ctx);
        let (extra, extra_latest) = LatestValueDispatcher::new();
        controller.add_dispatcher(Box::new(extra)).unwrap();

        controller.start().unwrap();
        let (late, _) = LatestValueDispatcher::new();
        assert!(matches!(
            controller.add_dispatcher(Box::new(late)),
            Err(ControlError::AlreadyRunning)
        ));
        wait_for_samples(&controller, 1);
        controller.stop();
        assert!(controller.wait_idle(Duration::from_secs(1)));
        assert!(extra_latest.latest().is_some());
    }
}
