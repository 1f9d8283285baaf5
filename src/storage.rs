//! CSV run log.
//!
//! One file per run, one row per recorded sample:
//!
//! ```text
//! Time(s),DMM1_X(V),DMM2_Y(V)
//! 0.11,-0.200000,-0.049330
//! ```
//!
//! Elapsed time has two decimals, voltages six. Degraded samples are written as
//! `nan`. Rows are buffered by the `csv` writer and flushed on [`RunLog::close`].

use crate::error::{SweepError, SweepResult};
use crate::sweep::SweepSample;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column headers, in order.
pub const HEADER: [&str; 3] = ["Time(s)", "DMM1_X(V)", "DMM2_Y(V)"];

/// File name for a run started at `started`: `{prefix}_{YYYYmmdd_HHMMSS}.csv`.
pub fn log_file_name(prefix: &str, started: DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, started.format("%Y%m%d_%H%M%S"))
}

fn format_volts(volts: f64) -> String {
    if volts.is_nan() {
        "nan".to_string()
    } else {
        format!("{:.6}", volts)
    }
}

/// Append-only sample log.
pub struct RunLog<W: Write = File> {
    writer: csv::Writer<W>,
    path: Option<PathBuf>,
    rows: usize,
    closed: bool,
}

impl RunLog<File> {
    /// Create a new log file, creating its directory if needed.
    ///
    /// An existing file at `path` is truncated.
    pub fn create(path: &Path) -> SweepResult<Self> {
        let log_create = |source: std::io::Error| SweepError::LogCreate {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(log_create)?;
        }
        let file = File::create(path).map_err(log_create)?;

        let mut log = Self::from_writer(file)?;
        log.path = Some(path.to_path_buf());
        info!(path = %path.display(), "Run log created");
        Ok(log)
    }
}

impl<W: Write> RunLog<W> {
    /// Start a log on any writer. The header is written immediately.
    pub fn from_writer(writer: W) -> SweepResult<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(HEADER)?;
        Ok(Self {
            writer,
            path: None,
            rows: 0,
            closed: false,
        })
    }

    /// Write one sample row.
    pub fn append(&mut self, sample: &SweepSample) -> SweepResult<()> {
        if self.closed {
            return Err(SweepError::LogWrite("run log already closed".to_string()));
        }
        self.writer.write_record([
            format!("{:.2}", sample.elapsed_seconds),
            format_volts(sample.x_volts),
            format_volts(sample.y_volts),
        ])?;
        self.rows += 1;
        Ok(())
    }

    /// Flush buffered rows. Idempotent.
    pub fn close(&mut self) -> SweepResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer
            .flush()
            .map_err(|e| SweepError::LogWrite(e.to_string()))?;
        debug!(rows = self.rows, "Run log closed");
        Ok(())
    }

    /// Rows written so far, header excluded.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// File path, `None` for in-memory logs.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the log and hand back the underlying writer.
    pub fn into_inner(mut self) -> SweepResult<W> {
        self.close()?;
        self.writer
            .into_inner()
            .map_err(|e| SweepError::LogWrite(e.to_string()))
    }
}
