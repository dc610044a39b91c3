//! Power supply actuator that applies coil current as a recall/set/save transaction

use tracing::error;

use super::{ActuatorPort, Command, LinkOpener};
use crate::calc::OutputBounds;
use crate::error::ActuatorError;

/// Actuator port that opens a fresh connection for every transaction.
///
/// Each `apply` recalls the baseline memory slot, holds the voltage at the
/// rail, sets the current to the command, and saves the slot again.
/// The connection is released on every exit path when the link goes out of scope.
#[derive(Debug)]
pub struct SupplyActuator<O: LinkOpener> {
    opener: O,
    channel: u8,
    memory_slot: u8,
    max_voltage: f64,
    limits: OutputBounds,
}

impl<O: LinkOpener> SupplyActuator<O> {
    pub fn new(
        opener: O,
        channel: u8,
        memory_slot: u8,
        max_voltage: f64,
        limits: OutputBounds,
    ) -> Self {
        Self {
            opener,
            channel,
            memory_slot,
            max_voltage,
            limits,
        }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }
}

impl<O: LinkOpener> ActuatorPort for SupplyActuator<O> {
    fn apply(&mut self, command: Command) -> Result<(), ActuatorError> {
        let amps = command.amps();
        if !self.limits.contains(amps) {
            return Err(ActuatorError::OutOfRange {
                value: amps,
                min: self.limits.min,
                max: self.limits.max,
            });
        }

        let mut link = self.opener.open().map_err(|e| {
            error!("Failed to open power supply connection: {e}");
            ActuatorError::Transport(e)
        })?;

        let step = |what: &str, e: String| {
            error!("Power supply transaction failed during {what}: {e}");
            ActuatorError::Transport(format!("{what}: {e}"))
        };
        link.recall(self.memory_slot).map_err(|e| step("recall", e))?;
        link.set_voltage(self.channel, self.max_voltage)
            .map_err(|e| step("set voltage", e))?;
        link.set_current(self.channel, amps)
            .map_err(|e| step("set current", e))?;
        link.save(self.memory_slot).map_err(|e| step("save", e))?;

        Ok(())
    }

    fn rail_voltage(&self) -> f64 {
        self.max_voltage
    }
}
