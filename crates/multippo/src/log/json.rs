//! JSON-lines backend.

use super::{StatsReporter, StepStats};
use crate::Result;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Serialize)]
struct Record<'a> {
    step: u64,
    #[serde(flatten)]
    stats: &'a StepStats,
}

/// Appends one JSON object per training step to a writer.
pub struct JsonLinesReporter {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesReporter {
    /// Create (or truncate) `path` and report into it
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Lock the writer, recovering from a poisoned lock
    fn writer(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Stats writer lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl StatsReporter for JsonLinesReporter {
    fn report(&self, step: u64, stats: &StepStats) {
        let mut writer = self.writer();
        let written = serde_json::to_writer(&mut *writer, &Record { step, stats })
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        if let Err(err) = written {
            tracing::warn!(%err, step, "Failed to write step stats");
        }
    }

    fn flush(&self) -> Result<()> {
        self.writer().flush()?;
        Ok(())
    }
}
