//! Custom error types for the sweep application.
//!
//! This module defines the primary error type, `SweepError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report what can go
//! wrong during a run, from operator input and configuration files to instrument
//! communication and the on-disk run log.
//!
//! ## Error Hierarchy
//!
//! - **`InputValidation`**: operator-supplied values that are non-numeric or out of
//!   range. Raised by the control surface before the core is invoked.
//! - **`Config`**: wraps `figment` errors from loading the run configuration.
//! - **`InstrumentUnreachable`**: an address or output channel could not be opened.
//!   Fatal, raised before any instrument is driven.
//! - **`Configuration`**: an instrument was reached but rejected its setup commands.
//! - **`OutputWrite`**: the analog output write failed. Fatal mid-loop.
//! - **`LogCreate`** / **`LogWrite`**: the run log could not be created or appended.
//! - **`SessionClosed`**: an operation was attempted on a released session.
//!
//! A failed measurement read is deliberately *not* an error variant: the session
//! substitutes NaN for the sample and the run continues.
//!
//! Instrument drivers return `anyhow::Result`; their errors are flattened into the
//! `reason` strings here at the session boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Errors raised by a sweep run.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Form or configuration values that cannot describe a run
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Configuration file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// An instrument or the output channel could not be opened
    #[error("Instrument unreachable: {role} at '{address}': {reason}")]
    InstrumentUnreachable {
        /// `source`, `meter_x`, `meter_y` or `analog output`
        role: &'static str,
        /// Address or channel id that failed
        address: String,
        /// Driver error chain
        reason: String,
    },

    /// An instrument rejected its setup commands
    #[error("Instrument configuration failed for {role}: {reason}")]
    Configuration {
        /// Instrument role
        role: &'static str,
        /// Driver error chain
        reason: String,
    },

    /// Writing a level to the coil output failed
    #[error("Analog output write of {volts} V failed: {reason}")]
    OutputWrite {
        /// Level that was being written
        volts: f64,
        /// Driver error chain
        reason: String,
    },

    /// The run log file could not be created
    #[error("Failed to create run log at {}: {source}", path.display())]
    LogCreate {
        /// Intended log path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A row could not be written or flushed
    #[error("Failed to write run log: {0}")]
    LogWrite(String),

    /// Operation on a session after `close()`
    #[error("Instrument session already closed")]
    SessionClosed,
}

impl SweepError {
    /// True for errors raised before the sweep loop drove any instrument.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            SweepError::InputValidation(_)
                | SweepError::Config(_)
                | SweepError::InstrumentUnreachable { .. }
                | SweepError::Configuration { .. }
                | SweepError::LogCreate { .. }
        )
    }
}

impl From<csv::Error> for SweepError {
    fn from(value: csv::Error) -> Self {
        SweepError::LogWrite(value.to_string())
    }
}
