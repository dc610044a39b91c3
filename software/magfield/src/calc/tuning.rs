//! Shared tuning state written by the operator and read by the PID controller

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// PID gain triple. Always replaced as a unit.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

impl Gains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    /// Each gain must be finite; sign is left to the operator.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, v) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !v.is_finite() {
                return Err(ConfigurationError::NonFinite { field });
            }
        }
        Ok(())
    }
}

struct TuningInner {
    gains: RwLock<Gains>,
    /// Bit pattern of the setpoint, so that it is swapped as a single word
    setpoint: AtomicU64,
    reset_requested: AtomicBool,
}

/// Cloneable handle to the live tuning of a PID controller.
#[derive(Clone)]
pub struct TuningHandle {
    inner: Arc<TuningInner>,
}

impl std::fmt::Debug for TuningHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuningHandle")
            .field("gains", &self.gains())
            .field("setpoint", &self.setpoint())
            .finish()
    }
}

impl Default for TuningHandle {
    fn default() -> Self {
        Self::new(Gains::default(), 1.0)
    }
}

impl TuningHandle {
    pub fn new(gains: Gains, setpoint: f64) -> Self {
        Self {
            inner: Arc::new(TuningInner {
                gains: RwLock::new(gains),
                setpoint: AtomicU64::new(setpoint.to_bits()),
                reset_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Snapshot of the current gain triple.
    pub fn gains(&self) -> Gains {
        // A poisoned lock still holds a whole triple; writes are a single assignment
        match self.inner.gains.read() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replace all three gains at once.
    pub fn set_gains(&self, gains: Gains) -> Result<(), ConfigurationError> {
        gains.validate()?;
        match self.inner.gains.write() {
            Ok(mut g) => *g = gains,
            Err(poisoned) => *poisoned.into_inner() = gains,
        }
        Ok(())
    }

    pub fn setpoint(&self) -> f64 {
        f64::from_bits(self.inner.setpoint.load(Ordering::Acquire))
    }

    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), ConfigurationError> {
        if !setpoint.is_finite() {
            return Err(ConfigurationError::NonFinite { field: "setpoint" });
        }
        self.inner
            .setpoint
            .store(setpoint.to_bits(), Ordering::Release);
        Ok(())
    }

    /// Ask the controller to clear its integral and last-error before its next output.
    pub fn request_reset(&self) {
        self.inner.reset_requested.store(true, Ordering::Release);
    }

    /// Consume a pending reset request
    pub(crate) fn take_reset(&self) -> bool {
        self.inner.reset_requested.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejected_update_keeps_prior_values() {
        let t = TuningHandle::new(Gains::new(2.0, 0.5, 0.1), 0.3);

        let err = t.set_gains(Gains::new(1.0, f64::NAN, 0.0)).unwrap_err();
        assert_eq!(err, ConfigurationError::NonFinite { field: "ki" });
        assert_eq!(t.gains(), Gains::new(2.0, 0.5, 0.1));

        assert!(t.set_setpoint(f64::INFINITY).is_err());
        assert_eq!(t.setpoint(), 0.3);
    }

    #[test]
    fn reset_request_is_consumed_once() {
        let t = TuningHandle::default();
        assert!(!t.take_reset());
        t.request_reset();
        assert!(t.take_reset());
        assert!(!t.take_reset());
    }

    #[test]
    fn concurrent_gain_updates_are_never_torn() {
        let t = TuningHandle::new(Gains::new(1.0, 1.0, 1.0), 0.0);
        let writer = {
            let t = t.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    let g = if i % 2 == 0 { 2.0 } else { 1.0 };
                    t.set_gains(Gains::new(g, g, g)).unwrap();
                }
            })
        };

        for _ in 0..20_000 {
            let g = t.gains();
            assert!(g.kp == g.ki && g.ki == g.kd, "torn read {g:?}");
        }
        writer.join().unwrap();
    }
}
