//! # Magnetic Response Sweep Library
//!
//! Core library for the `mag_sweep` tools. A sweep biases a sample with a source unit,
//! steps a coil's drive voltage through a coarse grid with a finer grid around zero,
//! out and back, and logs two multimeter readings at every step. Keeping the logic in a
//! library lets the headless CLI (`main.rs`) and the egui front panel (`gui_main.rs`)
//! share it, and lets the whole run be exercised against a simulated bench.
//!
//! ## Crate Structure
//!
//! - **`sequence`**: builds the forward/backward voltage sequence from a coarse and a
//!   fine range.
//! - **`session`**: opens, configures and safely shuts down the instruments.
//! - **`sweep`**: the per-step write, settle, read and record loop, plus the
//!   `LiveView` seam used by plots.
//! - **`storage`**: the CSV run log.
//! - **`measurement`**: one full run with guaranteed cleanup.
//! - **`cancel`**: the stop flag shared between a control surface and the loop.
//! - **`control`**: the operator form model.
//! - **`config`**: run configuration loaded with `figment`.
//! - **`error`**: the crate-wide `SweepError`.
//! - **`hardware`**: capability traits, SCPI drivers, VISA transport and the
//!   simulated bench.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`gui`**: the egui front panel (feature `gui_egui`).

pub mod cancel;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod sequence;
pub mod session;
pub mod storage;
pub mod sweep;

#[cfg(feature = "gui_egui")]
pub mod gui;

pub use cancel::{CancelHandle, CancelView};
pub use config::RunConfig;
pub use error::{SweepError, SweepResult};
pub use measurement::{run_measurement, RunReport};
pub use sweep::{LiveView, RunOutcome};
