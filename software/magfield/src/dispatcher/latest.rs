use std::sync::{Arc, RwLock};

use super::{Dispatcher, Sample};
use crate::controller::context::ControllerCtx;

/// Present values shown to the operator
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Readout {
    pub voltage: f64,
    pub current: f64,
    pub field: f64,
}

impl From<&Sample> for Readout {
    fn from(s: &Sample) -> Self {
        Self {
            voltage: s.voltage,
            current: s.current,
            field: s.field,
        }
    }
}

/// Cloneable handle for reading the latest sample.
#[derive(Clone, Default, Debug)]
pub struct LatestValueHandle {
    inner: Arc<RwLock<Option<Sample>>>,
}

impl LatestValueHandle {
    /// Replace the stored sample.
    fn store(&self, sample: Option<Sample>) {
        match self.inner.write() {
            Ok(mut w) => *w = sample,
            Err(poisoned) => *poisoned.into_inner() = sample,
        }
    }

    /// Latest sample, if any tick has completed
    pub fn latest_sample(&self) -> Option<Sample> {
        match self.inner.read() {
            Ok(r) => *r,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Latest voltage, current, and field
    pub fn latest(&self) -> Option<Readout> {
        self.latest_sample().as_ref().map(Readout::from)
    }
}

/// Dispatcher that always keeps the latest sample available via a shared handle.
#[derive(Default, Debug)]
pub struct LatestValueDispatcher {
    handle: LatestValueHandle,
}

impl LatestValueDispatcher {
    pub fn new() -> (Self, LatestValueHandle) {
        let handle = LatestValueHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl Dispatcher for LatestValueDispatcher {
    fn init(&mut self, _ctx: &ControllerCtx) -> Result<(), String> {
        // Keep the last value of a previous run on display until a new tick lands
        Ok(())
    }

    fn consume(&mut self, sample: &Sample) -> Result<(), String> {
        self.handle.store(Some(*sample));
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), String> {
        Ok(())
    }
}
