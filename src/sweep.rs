//! The acquisition loop.
//!
//! For each point of the sequence: check for a stop request, drive the coil, wait for
//! the field to settle, read both meters and record the pair. The first and last
//! points are driven and read but never recorded. The coil is written to `0.0` when
//! the loop ends, whether it completed or was stopped.

use crate::cancel::CancelView;
use crate::error::SweepResult;
use crate::sequence::VoltageSequence;
use crate::session::InstrumentSession;
use crate::storage::RunLog;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Default wait between an output write and the meter reads.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);

/// One recorded measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepSample {
    /// Seconds since the loop started, taken after settling
    pub elapsed_seconds: f64,
    /// Meter X reading in volts, NaN if the read failed
    pub x_volts: f64,
    /// Meter Y reading in volts, NaN if the read failed
    pub y_volts: f64,
}

impl SweepSample {
    /// True if the read failed and NaN was recorded.
    pub fn is_degraded(&self) -> bool {
        self.x_volts.is_nan() || self.y_volts.is_nan()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every point was visited
    Completed,
    /// Stop observed before the point at `at_index` was driven.
    Cancelled { at_index: usize },
}

/// Counters from one pass of the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepStats {
    /// Completed or stopped
    pub outcome: RunOutcome,
    /// Points driven and read
    pub points_visited: usize,
    /// Samples appended to the log
    pub samples_recorded: usize,
    /// Recorded samples with NaN readings
    pub degraded_samples: usize,
}

/// Receives recorded pairs as they are acquired.
pub trait LiveView: Send + Sync {
    /// Called once per recorded sample.
    fn push(&self, x: f64, y: f64);
}

/// Discards every sample.
pub struct NullView;

impl LiveView for NullView {
    fn push(&self, _x: f64, _y: f64) {}
}

/// Message sent by [`ChannelView`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepEvent {
    /// One recorded pair
    Sample {
        /// Meter X reading in volts
        x: f64,
        /// Meter Y reading in volts
        y: f64,
    },
}

/// Forwards samples over an unbounded channel, for a plot running on another thread.
pub struct ChannelView {
    tx: mpsc::UnboundedSender<SweepEvent>,
}

impl ChannelView {
    /// View plus the receiving end for the plot.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SweepEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LiveView for ChannelView {
    fn push(&self, x: f64, y: f64) {
        // A closed receiver means nobody is watching; the run carries on.
        let _ = self.tx.send(SweepEvent::Sample { x, y });
    }
}

/// The per-point acquisition loop.
pub struct SweepLoop {
    settle: Duration,
}

impl Default for SweepLoop {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE)
    }
}

impl SweepLoop {
    /// Loop waiting `settle` after each output write.
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// Traverse `sequence` once.
    ///
    /// Read failures are recorded as NaN and do not stop the loop. Output write and
    /// log append failures abort it; the caller is responsible for closing the
    /// session and the log afterwards.
    pub async fn run<W: Write>(
        &self,
        sequence: &VoltageSequence,
        session: &InstrumentSession,
        cancel: &CancelView,
        log: &mut RunLog<W>,
        view: &dyn LiveView,
    ) -> SweepResult<SweepStats> {
        let span = info_span!("sweep", points = sequence.len(), channel = session.channel());
        async {
            let mut stats = SweepStats {
                outcome: RunOutcome::Completed,
                points_visited: 0,
                samples_recorded: 0,
                degraded_samples: 0,
            };
            let started = Instant::now();

            for (index, &volts) in sequence.points().iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(index, "Stop requested, zeroing output");
                    if let Err(err) = session.set_output(0.0).await {
                        warn!(error = %err, "Failed to zero output on stop");
                    }
                    stats.outcome = RunOutcome::Cancelled { at_index: index };
                    break;
                }

                session.set_output(volts).await?;
                sleep(self.settle).await;
                let elapsed = started.elapsed().as_secs_f64();
                let (x, y) = session.read_pair().await?;
                stats.points_visited += 1;

                if sequence.is_boundary(index) {
                    debug!(index, volts, "Boundary point not recorded");
                    continue;
                }

                let sample = SweepSample {
                    elapsed_seconds: elapsed,
                    x_volts: x,
                    y_volts: y,
                };
                log.append(&sample)?;
                if sample.is_degraded() {
                    stats.degraded_samples += 1;
                }
                stats.samples_recorded += 1;
                view.push(x, y);
            }

            if let Err(err) = session.set_output(0.0).await {
                warn!(error = %err, "Failed to zero output after sweep");
            }

            info!(
                outcome = ?stats.outcome,
                recorded = stats.samples_recorded,
                degraded = stats.degraded_samples,
                "Sweep finished"
            );
            Ok(stats)
        }
        .instrument(span)
        .await
    }
}
