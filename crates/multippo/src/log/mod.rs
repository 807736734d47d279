//! Training statistics reporting.
//!
//! Provides:
//! - `StepStats` - typed statistics of one training step
//! - `StatsReporter` - sink for step statistics; a `Vec` of reporters fans out
//! - `ConsoleReporter` - structured `tracing` events
//! - `JsonLinesReporter` - one JSON record per training step

mod console;
mod json;
mod stats;

pub use console::ConsoleReporter;
pub use json::JsonLinesReporter;
pub use stats::StepStats;

use crate::Result;

/// Receives the statistics of every training step.
pub trait StatsReporter: Send + Sync {
    /// Record the statistics of training step `step`.
    fn report(&self, step: u64, stats: &StepStats);

    /// Flush buffered records.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards every record.
impl StatsReporter for () {
    fn report(&self, _step: u64, _stats: &StepStats) {}
}

impl<R: StatsReporter + ?Sized> StatsReporter for Box<R> {
    fn report(&self, step: u64, stats: &StepStats) {
        (**self).report(step, stats);
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

impl<R: StatsReporter> StatsReporter for Vec<R> {
    fn report(&self, step: u64, stats: &StepStats) {
        for reporter in self {
            reporter.report(step, stats);
        }
    }

    /// Flushes every reporter and returns the first failure.
    fn flush(&self) -> Result<()> {
        let mut first_err = None;
        for reporter in self {
            if let Err(err) = reporter.flush() {
                tracing::warn!(%err, "Failed to flush stats reporter");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
