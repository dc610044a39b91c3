//! Start/stop signaling between the run handle and the control loop worker.
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::ControlError;

/// Lifecycle of the control loop.
///
/// `Idle` -> `Running` on start, `Running` -> `StopRequested` on stop,
/// and back to `Idle` once the worker observes the request at a tick boundary
/// or ends the run on a fault.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    StopRequested,
}

/// Classic predicate-signal pair for inter-thread signaling
/// using OS-scheduled condition variable.
///
/// The state doubles as the worker's cancellation token.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: Mutex<LoopState>,
    cvar: Condvar,
}

impl Lifecycle {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        // The state is a plain enum; a panic while holding the lock can't leave it half-written
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self) -> LoopState {
        *self.lock()
    }

    /// Claim the loop for a new run. Only one run may be active at a time.
    pub(crate) fn begin(&self) -> Result<(), ControlError> {
        let mut state = self.lock();
        match *state {
            LoopState::Idle => {
                *state = LoopState::Running;
                self.cvar.notify_all();
                Ok(())
            }
            LoopState::Running | LoopState::StopRequested => Err(ControlError::AlreadyRunning),
        }
    }

    /// Ask a running loop to stop at its next tick boundary.
    /// Returns false if there was no running loop to stop.
    pub fn request_stop(&self) -> bool {
        let mut state = self.lock();
        match *state {
            LoopState::Running => {
                *state = LoopState::StopRequested;
                self.cvar.notify_all();
                true
            }
            LoopState::StopRequested => true,
            LoopState::Idle => false,
        }
    }

    pub fn stop_requested(&self) -> bool {
        *self.lock() == LoopState::StopRequested
    }

    /// Mark the run as over.
    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        *state = LoopState::Idle;
        self.cvar.notify_all();
    }

    /// Sleep for up to `timeout`, waking early if a stop is requested.
    /// Returns true if a stop was requested.
    pub(crate) fn wait_for_stop(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .cvar
            .wait_timeout_while(state, timeout, |s| *s == LoopState::Running)
            .unwrap_or_else(|p| p.into_inner());
        *state != LoopState::Running
    }

    /// Wait for the loop to return to idle.
    /// Returns false if it was still active after `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .cvar
            .wait_timeout_while(state, timeout, |s| *s != LoopState::Idle)
            .unwrap_or_else(|p| p.into_inner());
        *state == LoopState::Idle
    }
}

/// Drop-guard to guarantee that the lifecycle returns to idle
/// if the worker exits the loop for any reason.
pub(crate) struct IdleGuard {
    pub(crate) lifecycle: Arc<Lifecycle>,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.lifecycle.finish();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn transitions() {
        let lc = Lifecycle::default();
        assert_eq!(lc.state(), LoopState::Idle);
        assert!(!lc.request_stop());

        lc.begin().unwrap();
        assert_eq!(lc.state(), LoopState::Running);
        assert!(matches!(lc.begin(), Err(ControlError::AlreadyRunning)));

        assert!(lc.request_stop());
        assert!(lc.stop_requested());
        assert!(matches!(lc.begin(), Err(ControlError::AlreadyRunning)));

        lc.finish();
        assert_eq!(lc.state(), LoopState::Idle);
        lc.begin().unwrap();
    }

    #[test]
    fn stop_wakes_a_waiting_worker() {
        let lc = Arc::new(Lifecycle::default());
        lc.begin().unwrap();

        let worker = {
            let lc = lc.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let stopped = lc.wait_for_stop(Duration::from_secs(10));
                (stopped, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        lc.request_stop();
        let (stopped, waited) = worker.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn wait_for_stop_times_out_while_running() {
        let lc = Lifecycle::default();
        lc.begin().unwrap();
        assert!(!lc.wait_for_stop(Duration::from_millis(5)));
    }

    #[test]
    fn guard_returns_to_idle_on_panic() {
        let lc = Arc::new(Lifecycle::default());
        lc.begin().unwrap();
        let handle = {
            let lc = lc.clone();
            std::thread::spawn(move || {
                let _guard = IdleGuard { lifecycle: lc };
                panic!("worker fault");
            })
        };
        assert!(handle.join().is_err());
        assert!(lc.wait_idle(Duration::from_secs(1)));
    }
}
