//! Bounded in-memory sample history for display and export

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use super::{Dispatcher, Sample, write_csv};
use crate::controller::context::ControllerCtx;
use crate::error::ConfigurationError;

/// Samples split into index-aligned series, one per quantity
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Series {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub field: Vec<f64>,
}

/// Fixed-capacity ring of samples in strictly increasing time order.
///
/// When full, the oldest sample is evicted to make room for the newest.
/// Samples are stored as whole records, so every series view is index-aligned.
#[derive(Clone, Debug)]
pub struct SampleHistory {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Result<Self, ConfigurationError> {
        if capacity == 0 {
            return Err(ConfigurationError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Append a sample, returning the evicted one if the history was full.
    ///
    /// A sample that is not newer than the latest one is dropped.
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        if let Some(last) = self.samples.back() {
            if !(sample.elapsed_s > last.elapsed_s) {
                warn!(
                    "Dropping out-of-order sample at {}s (latest is {}s)",
                    sample.elapsed_s, last.elapsed_s
                );
                return None;
            }
        }

        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Copy of the retained samples, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Retained samples as parallel series, oldest first
    pub fn series(&self) -> Series {
        let n = self.samples.len();
        let mut s = Series {
            time: Vec::with_capacity(n),
            voltage: Vec::with_capacity(n),
            current: Vec::with_capacity(n),
            field: Vec::with_capacity(n),
        };
        for x in self.samples.iter() {
            s.time.push(x.elapsed_s);
            s.voltage.push(x.voltage);
            s.current.push(x.current);
            s.field.push(x.field);
        }
        s
    }

    /// Write the retained samples as CSV, oldest first
    pub fn export<W: Write>(&self, sink: W) -> io::Result<()> {
        write_csv(sink, self.samples.iter())
    }
}

/// Cloneable, thread-safe handle to a shared `SampleHistory`.
///
/// The control loop is the only writer; readers get consistent copies.
#[derive(Clone, Debug)]
pub struct HistoryHandle {
    inner: Arc<RwLock<SampleHistory>>,
}

impl HistoryHandle {
    pub fn new(history: SampleHistory) -> Self {
        Self {
            inner: Arc::new(RwLock::new(history)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SampleHistory> {
        // Every write is a complete push, so a poisoned history is still whole
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SampleHistory> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, sample: Sample) -> Option<Sample> {
        self.write().push(sample)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.read().snapshot()
    }

    pub fn series(&self) -> Series {
        self.read().series()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Write the current snapshot to a CSV file
    pub fn export(&self, path: &Path) -> io::Result<()> {
        // Copy out first so the loop isn't blocked on disk
        let snapshot = self.snapshot();
        let writer = BufWriter::new(File::create(path)?);
        write_csv(writer, snapshot.iter())?;
        info!("Exported {} samples to {}", snapshot.len(), path.display());
        Ok(())
    }
}

/// Dispatcher that records each sample into a shared history
#[derive(Debug)]
pub struct HistoryDispatcher {
    handle: HistoryHandle,
}

impl HistoryDispatcher {
    pub fn new(handle: HistoryHandle) -> Self {
        Self { handle }
    }
}

impl Dispatcher for HistoryDispatcher {
    fn init(&mut self, _ctx: &ControllerCtx) -> Result<(), String> {
        Ok(())
    }

    fn consume(&mut self, sample: &Sample) -> Result<(), String> {
        self.handle.push(*sample);
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(t: f64) -> Sample {
        Sample {
            elapsed_s: t,
            voltage: 30.0,
            current: t * 0.1,
            field: t * 0.01,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let capacity = 5;
        let mut h = SampleHistory::new(capacity).unwrap();
        for i in 0..capacity {
            assert_eq!(h.push(sample(i as f64)), None);
        }
        assert_eq!(h.push(sample(capacity as f64)), Some(sample(0.0)));

        let snap = h.snapshot();
        assert_eq!(snap.len(), capacity);
        assert_eq!(snap.first(), Some(&sample(1.0)));
        assert_eq!(snap.last(), Some(&sample(capacity as f64)));
    }

    #[test]
    fn series_stay_aligned_after_every_push() {
        let mut h = SampleHistory::new(7).unwrap();
        for i in 0..30 {
            h.push(sample(i as f64 * 0.1 + 0.1));
            let s = h.series();
            let n = h.len();
            assert!(n <= 7);
            assert_eq!(s.time.len(), n);
            assert_eq!(s.voltage.len(), n);
            assert_eq!(s.current.len(), n);
            assert_eq!(s.field.len(), n);
            for (k, x) in h.snapshot().iter().enumerate() {
                assert_eq!(s.time[k], x.elapsed_s);
                assert_eq!(s.voltage[k], x.voltage);
                assert_eq!(s.current[k], x.current);
                assert_eq!(s.field[k], x.field);
            }
        }
    }

    #[test]
    fn drops_out_of_order_samples() {
        let mut h = SampleHistory::new(3).unwrap();
        h.push(sample(1.0));
        h.push(sample(1.0));
        h.push(sample(0.5));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            SampleHistory::new(0).unwrap_err(),
            ConfigurationError::ZeroCapacity
        );
    }

    #[test]
    fn export_writes_header_and_rows() {
        let mut h = SampleHistory::new(100).unwrap();
        let n = 12;
        for i in 1..=n {
            h.push(sample(i as f64 / 7.0));
        }

        let mut out = Vec::new();
        h.export(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), n + 1);

        for (line, s) in lines[1..].iter().zip(h.snapshot()) {
            let vals: Vec<f64> = line.split(',').map(|v| v.parse().unwrap()).collect();
            assert_eq!(vals, vec![s.elapsed_s, s.voltage, s.current, s.field]);
        }
    }

    #[test]
    fn export_to_file() {
        let dir = std::env::temp_dir().join(format!("magfield_history_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("export.csv");

        let handle = HistoryHandle::new(SampleHistory::new(10).unwrap());
        handle.push(sample(0.1));
        handle.push(sample(0.2));
        handle.export(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
