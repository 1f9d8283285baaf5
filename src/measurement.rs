//! One complete measurement run.
//!
//! Validates the configuration, creates the run log, opens the instrument session,
//! runs the sweep loop, and then always closes the session and the log before
//! returning. Cleanup failures are logged and never replace the error that ended the
//! run.

use crate::cancel::CancelView;
use crate::config::RunConfig;
use crate::error::SweepResult;
use crate::hardware::InstrumentConnector;
use crate::session::{CleanupReport, InstrumentSession};
use crate::storage::RunLog;
use crate::sweep::{LiveView, RunOutcome, SweepLoop};
use chrono::Local;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Summary of a finished (completed or stopped) run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Completed or stopped
    pub outcome: RunOutcome,
    /// Points in the traversal sequence
    pub points: usize,
    /// Rows written to the log
    pub samples_recorded: usize,
    /// Samples recorded as NaN after a failed read
    pub degraded_samples: usize,
    /// Run log location
    pub log_path: PathBuf,
    /// Wall time of the whole run
    pub elapsed: Duration,
    /// Cleanup steps that failed
    pub cleanup: CleanupReport,
}

impl RunReport {
    /// True if every point was visited.
    pub fn completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Run one sweep described by `config` against `connector`.
///
/// The caller resets the cancel flag before starting; `cancel` is only read.
pub async fn run_measurement(
    config: &RunConfig,
    connector: &dyn InstrumentConnector,
    cancel: CancelView,
    view: &dyn LiveView,
) -> SweepResult<RunReport> {
    config.validate()?;
    let sequence = config.sequence();
    info!(sequence = %sequence.summary(), "Starting measurement");

    let started = Instant::now();
    let log_path = config.storage.log_path(Local::now());
    let mut log = RunLog::create(&log_path)?;

    let mut session = match InstrumentSession::open(&config.session(), connector).await {
        Ok(session) => session,
        Err(err) => {
            if let Err(close_err) = log.close() {
                warn!(error = %close_err, "Failed to close run log");
            }
            return Err(err);
        }
    };

    let result = SweepLoop::new(config.settle())
        .run(&sequence, &session, &cancel, &mut log, view)
        .await;

    let cleanup = session.close().await;
    let log_closed = log.close();

    let stats = match result {
        Ok(stats) => stats,
        Err(err) => {
            if let Err(close_err) = log_closed {
                warn!(error = %close_err, "Failed to close run log");
            }
            warn!(error = %err, "Measurement aborted");
            return Err(err);
        }
    };
    log_closed?;

    let report = RunReport {
        outcome: stats.outcome,
        points: sequence.len(),
        samples_recorded: stats.samples_recorded,
        degraded_samples: stats.degraded_samples,
        log_path,
        elapsed: started.elapsed(),
        cleanup,
    };
    info!(
        outcome = ?report.outcome,
        samples = report.samples_recorded,
        log = %report.log_path.display(),
        "Measurement finished"
    );
    Ok(report)
}
