//! Decode session runner
//!
//! Drives one decode session to end of stream, timing every demux+decode step, and
//! turns the accumulated time into a throughput figure.

use crate::backend::{DecodeBackend, DecodeError, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Scalar result of one worker
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Frames produced, including frames flushed after end of stream
    pub units_processed: u64,
    /// Frames per second over the timed steps
    pub rate_per_second: f64,
}

impl WorkerResult {
    pub fn new(units_processed: u64, rate_per_second: f64) -> Self {
        Self {
            units_processed,
            rate_per_second,
        }
    }
}

/// Per-session accumulator of step time and produced units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionTiming {
    total_elapsed_secs: f64,
    units: u64,
}

impl SessionTiming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one processing step
    pub fn record_step(&mut self, elapsed: Duration, units: u64) {
        self.total_elapsed_secs += elapsed.as_secs_f64();
        self.units += units;
    }

    /// Account the frames released after end of stream; adds no time
    pub fn add_flushed(&mut self, units: u64) {
        self.units += units;
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn total_elapsed_secs(&self) -> f64 {
        self.total_elapsed_secs
    }

    /// Milliseconds per unit with the session overhead amortized out
    ///
    /// `None` when nothing was produced or no time was measured. A missing overhead
    /// counts as zero.
    pub fn corrected_ms_per_unit(&self, overhead_ms: Option<f64>) -> Option<f64> {
        if self.units == 0 || self.total_elapsed_secs <= 0.0 {
            return None;
        }
        let units = self.units as f64;
        let ms_per_unit = (self.total_elapsed_secs / units) * 1000.0;
        Some(ms_per_unit - overhead_ms.unwrap_or(0.0) / units)
    }

    /// Units per second, 0.0 when either side of the ratio is zero
    pub fn rate(&self) -> f64 {
        if self.units == 0 || self.total_elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.units as f64 / self.total_elapsed_secs
    }

    /// Final result; the overhead only feeds the logged per-unit latency
    pub fn finish(&self, overhead_ms: Option<f64>) -> WorkerResult {
        if let Some(ms) = self.corrected_ms_per_unit(overhead_ms) {
            debug!(
                units = self.units,
                elapsed_secs = self.total_elapsed_secs,
                overhead_ms = overhead_ms.unwrap_or(0.0),
                corrected_ms_per_unit = ms,
                "session timing"
            );
        }
        WorkerResult::new(self.units, self.rate())
    }
}

/// Decode `input` on `device_id` until end of stream and report its throughput
///
/// The end-of-stream packet is still handed to the session so it can drain, and that
/// step is timed like any other.
pub fn run_session(
    backend: &dyn DecodeBackend,
    input: &Path,
    device_id: i32,
    config: &SessionConfig,
) -> Result<WorkerResult, DecodeError> {
    let mut demuxer = backend.open_source(input)?;
    let codec = demuxer.codec();
    let mut session = backend.create_session(device_id, codec, config)?;

    info!(
        input = %input.display(),
        device = device_id,
        %codec,
        "using device {} - {}",
        device_id,
        session.gpu_info()
    );

    let mut timing = SessionTiming::new();
    loop {
        let start = Instant::now();
        let packet = demuxer.next_unit()?;
        let produced = session.process_unit(&packet)?;
        timing.record_step(start.elapsed(), produced);

        if packet.is_end_of_stream() {
            break;
        }
    }
    timing.add_flushed(session.flushed_unit_count());

    let overhead = session.session_overhead_millis(std::process::id());
    let result = timing.finish(overhead);
    info!(
        device = device_id,
        frames = result.units_processed,
        fps = result.rate_per_second,
        "session finished"
    );
    Ok(result)
}
