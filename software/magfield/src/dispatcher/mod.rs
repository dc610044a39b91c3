//! Dispatchers send each tick's sample to an outside consumer,
//! usually the in-memory history or a display.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

mod history;
pub use history::{HistoryDispatcher, HistoryHandle, SampleHistory, Series};
mod latest;
pub use latest::{LatestValueDispatcher, LatestValueHandle, Readout};

use crate::controller::context::ControllerCtx;

/// Column headers of exported samples
pub const CSV_HEADER: [&str; 4] = [
    "Time (s)",
    "Voltage (V)",
    "Current (A)",
    "Magnetic Field (T)",
];

/// One tick's record. Never mutated after creation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    /// Seconds since the controller was created
    pub elapsed_s: f64,
    pub voltage: f64,
    pub current: f64,
    pub field: f64,
}

/// A data pipeline plugin that receives samples from the control loop
/// one tick at a time.
pub trait Dispatcher: Send {
    /// Set up the dispatcher at the start of a run
    fn init(&mut self, ctx: &ControllerCtx) -> Result<(), String>;

    /// Ingest a sample
    fn consume(&mut self, sample: &Sample) -> Result<(), String>;

    /// Shut down the dispatcher at the end of a run
    fn terminate(&mut self) -> Result<(), String>;
}

/// Generate CSV header row
pub fn csv_header() -> String {
    let mut header_string = CSV_HEADER.join(",");
    header_string.push('\n');
    header_string
}

/// Format a CSV row.
/// Floats use the shortest representation that parses back to the same value.
pub fn csv_row(stringbuf: &mut String, sample: &Sample) {
    stringbuf.clear();
    let Sample {
        elapsed_s,
        voltage,
        current,
        field,
    } = sample;
    stringbuf.push_str(&format!("{elapsed_s},{voltage},{current},{field}"));
    stringbuf.push('\n');
}

/// Write a header followed by one row per sample, in the order given
pub fn write_csv<'a, W: Write>(
    mut sink: W,
    samples: impl IntoIterator<Item = &'a Sample>,
) -> io::Result<()> {
    sink.write_all(csv_header().as_bytes())?;
    let mut stringbuf = String::new();
    for s in samples {
        csv_row(&mut stringbuf, s);
        sink.write_all(stringbuf.as_bytes())?;
    }
    sink.flush()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn csv_rows_parse_back_exactly() {
        let samples = [
            Sample {
                elapsed_s: 0.1,
                voltage: 30.0,
                current: 1.0 / 3.0,
                field: -2.5e-7,
            },
            Sample {
                elapsed_s: 1e-12,
                voltage: f64::MAX,
                current: 0.0,
                field: 123456.789,
            },
        ];

        let mut out = Vec::new();
        write_csv(&mut out, samples.iter()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("Time (s),Voltage (V),Current (A),Magnetic Field (T)")
        );
        for expected in samples.iter() {
            let vals: Vec<f64> = lines
                .next()
                .unwrap()
                .split(',')
                .map(|v| v.parse().unwrap())
                .collect();
            assert_eq!(
                vals,
                vec![
                    expected.elapsed_s,
                    expected.voltage,
                    expected.current,
                    expected.field
                ]
            );
        }
        assert_eq!(lines.next(), None);
    }
}
