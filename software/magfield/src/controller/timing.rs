//! Fixed-rate tick scheduling

use std::time::{Duration, Instant};

use tracing::warn;

/// Schedules ticks against absolute deadlines `start + n * period`
/// so that per-tick jitter doesn't accumulate into drift.
///
/// A tick that runs past its deadline skips the missed deadlines
/// rather than running a burst of late ticks to catch up.
pub struct TickClock {
    start: Instant,
    period: Duration,
    next: Duration,
    overruns: u64,
}

impl TickClock {
    pub fn new(period: Duration) -> Self {
        Self {
            start: Instant::now(),
            period,
            next: period,
            overruns: 0,
        }
    }

    /// Number of ticks that ran past their deadline
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Time to wait until the next tick should start
    pub fn until_next(&mut self) -> Duration {
        let now = self.start.elapsed();
        self.until_next_at(now)
    }

    fn until_next_at(&mut self, now: Duration) -> Duration {
        if now > self.next {
            let behind = now - self.next;
            let skipped = (behind.as_nanos() / self.period.as_nanos().max(1)) as u32 + 1;
            warn!("Tick overran its deadline by {behind:?}; skipping {skipped} tick(s)");
            self.overruns += 1;
            self.next += self.period * skipped;
        }

        let wait = self.next - now;
        self.next += self.period;
        wait
    }
}
