//! Field sensor that reports one reading per telemetry line

use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use super::{FieldReading, LineSource, SensorPort};
use crate::error::SensorError;

/// Decode one raw telemetry line into a reading.
pub fn parse_line(raw: &[u8]) -> Result<f64, SensorError> {
    let text = std::str::from_utf8(raw).map_err(|e| SensorError::Decode(e.to_string()))?;
    let text = text.trim();
    let v: f64 = text
        .parse()
        .map_err(|e| SensorError::Parse(format!("{text:?}: {e}")))?;

    // `inf` and `NaN` parse, but are never a measurement
    if !v.is_finite() {
        return Err(SensorError::Parse(format!("{text:?}: not finite")));
    }

    Ok(v)
}

/// Sensor port over a line-oriented transport.
#[derive(Debug)]
pub struct LineSensor<S: LineSource> {
    source: S,
    timeout: Option<Duration>,
    poll_interval: Duration,
    skipped_lines: u64,
}

impl<S: LineSource> LineSensor<S> {
    /// Without a timeout, a read waits indefinitely for the next line.
    pub fn new(source: S, timeout: Option<Duration>) -> Self {
        Self {
            source,
            timeout,
            poll_interval: Duration::from_millis(10),
            skipped_lines: 0,
        }
    }

    /// Number of noise lines discarded over the life of this sensor
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: LineSource> SensorPort for LineSensor<S> {
    fn read_field(&mut self) -> Result<FieldReading, SensorError> {
        // Start from a fresh line rather than whatever backlog accumulated since the last tick
        self.source.clear_input().map_err(SensorError::Transport)?;

        let start = Instant::now();
        loop {
            match self.source.poll_line().map_err(SensorError::Transport)? {
                Some(raw) => match parse_line(&raw) {
                    Ok(v) => return Ok(FieldReading(v)),
                    Err(e) => {
                        // Telemetry is expected to carry the occasional noise line
                        self.skipped_lines += 1;
                        warn!("Skipping sensor line: {e}");
                    }
                },
                None => thread::sleep(self.poll_interval),
            }

            // A stream of nothing but noise counts against the timeout too
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    return Err(SensorError::Timeout(timeout));
                }
            }
        }
    }
}
