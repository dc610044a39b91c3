//! Software stand-ins for the supply and sensor transports.
//!
//! `MockupCoil` is a first-order coil model shared between a supply link that
//! drives its current and a sensor line source that reports its field, so the
//! whole loop can run with no hardware attached. `ScriptedLines` and
//! `RecordingOpener` replay and record exact transport traffic.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{CommandLink, LineSource, LinkOpener};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct CoilState {
    amps: f64,
    tesla: f64,
    tesla_per_amp: f64,
    time_constant_s: f64,
    step_s: f64,
}

/// Coil whose field relaxes toward `tesla_per_amp * amps`
/// with a fixed time constant, advancing one step per sensor line.
#[derive(Clone, Debug)]
pub struct MockupCoil {
    state: Arc<Mutex<CoilState>>,
}

impl Default for MockupCoil {
    fn default() -> Self {
        Self::new(0.5, Duration::from_millis(300), Duration::from_millis(100))
    }
}

impl MockupCoil {
    pub fn new(tesla_per_amp: f64, time_constant: Duration, step: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoilState {
                amps: 0.0,
                tesla: 0.0,
                tesla_per_amp,
                time_constant_s: time_constant.as_secs_f64(),
                step_s: step.as_secs_f64(),
            })),
        }
    }

    pub fn amps(&self) -> f64 {
        lock(&self.state).amps
    }

    pub fn tesla(&self) -> f64 {
        lock(&self.state).tesla
    }

    fn drive(&self, amps: f64) {
        lock(&self.state).amps = amps;
    }

    /// Advance one step and get the new field
    fn advance(&self) -> f64 {
        let mut s = lock(&self.state);
        // Backward Euler, stable for any step size
        let alpha = s.step_s / (s.time_constant_s + s.step_s);
        let target = s.tesla_per_amp * s.amps;
        s.tesla += alpha * (target - s.tesla);
        s.tesla
    }

    /// A sensor reporting this coil's field
    pub fn sensor(&self) -> MockupSensor {
        MockupSensor {
            coil: self.clone(),
            noise_every: None,
            lines: 0,
        }
    }

    /// A supply opener driving this coil's current
    pub fn supply(&self) -> MockupOpener {
        MockupOpener {
            coil: self.clone(),
            opened: 0,
        }
    }
}

/// Telemetry from a `MockupCoil`, one line per poll
#[derive(Debug)]
pub struct MockupSensor {
    coil: MockupCoil,
    noise_every: Option<NonZeroUsize>,
    lines: u64,
}

impl MockupSensor {
    /// Replace every `n`th line with an undecodable or non-numeric one
    pub fn with_noise_every(mut self, n: NonZeroUsize) -> Self {
        self.noise_every = Some(n);
        self
    }
}

impl LineSource for MockupSensor {
    fn clear_input(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn poll_line(&mut self) -> Result<Option<Vec<u8>>, String> {
        self.lines += 1;
        if let Some(n) = self.noise_every {
            let n = n.get() as u64;
            if self.lines % n == 0 {
                // Alternate between the two kinds of noise
                let noise = if (self.lines / n) % 2 == 0 {
                    vec![0xff, 0xfe, b'1']
                } else {
                    b"OVERRANGE".to_vec()
                };
                return Ok(Some(noise));
            }
        }

        let tesla = self.coil.advance();
        Ok(Some(format!("{tesla:.6}\r").into_bytes()))
    }
}

/// Opens links that drive a `MockupCoil`
#[derive(Debug)]
pub struct MockupOpener {
    coil: MockupCoil,
    opened: u64,
}

impl MockupOpener {
    pub fn opened(&self) -> u64 {
        self.opened
    }
}

struct MockupLink {
    coil: MockupCoil,
}

impl CommandLink for MockupLink {
    fn recall(&mut self, _slot: u8) -> Result<(), String> {
        Ok(())
    }

    fn set_voltage(&mut self, _channel: u8, _volts: f64) -> Result<(), String> {
        Ok(())
    }

    fn set_current(&mut self, _channel: u8, amps: f64) -> Result<(), String> {
        self.coil.drive(amps);
        Ok(())
    }

    fn save(&mut self, _slot: u8) -> Result<(), String> {
        Ok(())
    }
}

impl LinkOpener for MockupOpener {
    fn open(&mut self) -> Result<Box<dyn CommandLink>, String> {
        self.opened += 1;
        Ok(Box::new(MockupLink {
            coil: self.coil.clone(),
        }))
    }
}

#[derive(Debug, Clone)]
enum Step {
    Line(Vec<u8>),
    Nothing,
    Fail(String),
}

/// Replays a fixed sequence of telemetry events.
///
/// Once the script runs out, polls fail with a transport error,
/// or report nothing forever if the script is `silent`.
#[derive(Debug, Default)]
pub struct ScriptedLines {
    steps: VecDeque<Step>,
    silent: bool,
    clears: usize,
}

impl ScriptedLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, raw: &[u8]) -> Self {
        self.steps.push_back(Step::Line(raw.to_vec()));
        self
    }

    /// A poll that finds nothing available yet
    pub fn nothing(mut self) -> Self {
        self.steps.push_back(Step::Nothing);
        self
    }

    pub fn fail(mut self, msg: &str) -> Self {
        self.steps.push_back(Step::Fail(msg.to_owned()));
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Number of times the input was cleared
    pub fn clears(&self) -> usize {
        self.clears
    }
}

impl LineSource for ScriptedLines {
    fn clear_input(&mut self) -> Result<(), String> {
        self.clears += 1;
        Ok(())
    }

    fn poll_line(&mut self) -> Result<Option<Vec<u8>>, String> {
        match self.steps.pop_front() {
            Some(Step::Line(raw)) => Ok(Some(raw)),
            Some(Step::Nothing) => Ok(None),
            Some(Step::Fail(msg)) => Err(msg),
            None if self.silent => Ok(None),
            None => Err("End of telemetry script".to_owned()),
        }
    }
}

/// One operation sent over a supply link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    Recall(u8),
    SetVoltage(u8, f64),
    SetCurrent(u8, f64),
    Save(u8),
}

#[derive(Debug, Default)]
struct Recording {
    ops: Vec<LinkOp>,
    opened: usize,
    live: usize,
    fail_at: Option<usize>,
    refuse_open: bool,
}

/// Opens links that record every operation, optionally failing partway.
/// Clones share one recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingOpener {
    rec: Arc<Mutex<Recording>>,
}

impl RecordingOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the operation at this index, counted over the life of the opener
    pub fn fail_at(self, index: usize) -> Self {
        lock(&self.rec).fail_at = Some(index);
        self
    }

    pub fn refuse_open(self) -> Self {
        lock(&self.rec).refuse_open = true;
        self
    }

    /// Operations that completed
    pub fn ops(&self) -> Vec<LinkOp> {
        lock(&self.rec).ops.clone()
    }

    pub fn opened(&self) -> usize {
        lock(&self.rec).opened
    }

    /// Links opened and not yet dropped
    pub fn live_links(&self) -> usize {
        lock(&self.rec).live
    }
}

struct RecordingLink {
    rec: Arc<Mutex<Recording>>,
}

impl RecordingLink {
    fn record(&mut self, op: LinkOp) -> Result<(), String> {
        let mut rec = lock(&self.rec);
        if rec.fail_at == Some(rec.ops.len()) {
            return Err(format!("Connection dropped before {op:?}"));
        }
        rec.ops.push(op);
        Ok(())
    }
}

impl Drop for RecordingLink {
    fn drop(&mut self) {
        lock(&self.rec).live -= 1;
    }
}

impl CommandLink for RecordingLink {
    fn recall(&mut self, slot: u8) -> Result<(), String> {
        self.record(LinkOp::Recall(slot))
    }

    fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<(), String> {
        self.record(LinkOp::SetVoltage(channel, volts))
    }

    fn set_current(&mut self, channel: u8, amps: f64) -> Result<(), String> {
        self.record(LinkOp::SetCurrent(channel, amps))
    }

    fn save(&mut self, slot: u8) -> Result<(), String> {
        self.record(LinkOp::Save(slot))
    }
}

impl LinkOpener for RecordingOpener {
    fn open(&mut self) -> Result<Box<dyn CommandLink>, String> {
        let mut rec = lock(&self.rec);
        if rec.refuse_open {
            return Err("Supply port busy".to_owned());
        }
        rec.opened += 1;
        rec.live += 1;
        Ok(Box::new(RecordingLink {
            rec: self.rec.clone(),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::calc::OutputBounds;
    use crate::peripheral::{ActuatorPort, Command, LineSensor, SensorPort, SupplyActuator};

    #[test]
    fn coil_settles_toward_driven_field() {
        let coil = MockupCoil::default();
        let mut supply = SupplyActuator::new(coil.supply(), 0, 0, 30.0, OutputBounds::default());
        let mut sensor = LineSensor::new(coil.sensor(), None);

        supply.apply(Command::new(2.0)).unwrap();
        let mut last = 0.0;
        for _ in 0..50 {
            let b = sensor.read_field().unwrap().tesla();
            assert!(b >= last);
            last = b;
        }
        assert!((last - 1.0).abs() < 1e-3, "{last}");
        assert_eq!(coil.amps(), 2.0);
    }

    #[test]
    fn noisy_sensor_still_reads() {
        let coil = MockupCoil::default();
        let noisy = coil.sensor().with_noise_every(NonZeroUsize::new(2).unwrap());
        let mut sensor = LineSensor::new(noisy, None);
        for _ in 0..10 {
            sensor.read_field().unwrap();
        }
        assert!(sensor.skipped_lines() >= 9);
    }
}
