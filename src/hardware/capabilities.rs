//! Atomic Hardware Capabilities
//!
//! Fine-grained capability traits for the three kinds of device a sweep drives.
//! Instead of one monolithic `Instrument` trait, each device implements only what it
//! actually does:
//!
//! - the source unit implements [`SourceOutput`]
//! - each multimeter implements [`Readable`] + [`Voltmeter`]
//! - the coil driver implements [`AnalogOutput`]
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! The session converts these errors into [`crate::error::SweepError`] kinds, so
//! drivers only need to attach useful context.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the source unit regulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Constant-voltage output
    #[default]
    Voltage,
    /// Constant-current output
    Current,
}

impl SourceMode {
    /// Unit of the source value in this mode.
    pub fn unit(&self) -> &'static str {
        match self {
            SourceMode::Voltage => "V",
            SourceMode::Current => "A",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Voltage => write!(f, "voltage"),
            SourceMode::Current => write!(f, "current"),
        }
    }
}

/// Capability: Scalar Readout
///
/// Devices that produce a single scalar value per request (here: DC volts).
///
/// # Contract
/// - `read()` performs one synchronous measurement and returns the value
/// - No internal retry; a failure is reported as `Err`
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    async fn read(&self) -> Result<f64>;
}

/// Capability: DC voltmeter setup
///
/// A [`Readable`] that can be put into auto-ranging DC voltage acquisition.
#[async_trait]
pub trait Voltmeter: Readable {
    /// Configure for automatic-range DC voltage measurement.
    async fn configure_dc_voltage(&self) -> Result<()>;
}

/// Capability: Programmable source output
///
/// Source-measure units that regulate a voltage or current and can switch their
/// output on and off.
///
/// # Contract
/// - `configure` selects the function and level but does not enable the output
/// - `disable_output` must be safe to call repeatedly
#[async_trait]
pub trait SourceOutput: Send + Sync {
    /// Select source function and level.
    async fn configure(&self, mode: SourceMode, value: f64) -> Result<()>;

    /// Switch the output on.
    async fn enable_output(&self) -> Result<()>;

    /// Switch the output off.
    async fn disable_output(&self) -> Result<()>;
}

/// Capability: Analog output channel
///
/// A single DAC channel driving the coil amplifier.
///
/// # Contract
/// - `write_voltage` returns once the value has been handed to the hardware
/// - Settling is the caller's responsibility
#[async_trait]
pub trait AnalogOutput: Send + Sync {
    /// Drive the channel to `volts`.
    async fn write_voltage(&self, volts: f64) -> Result<()>;

    /// Channel identifier this output was reserved under.
    fn channel(&self) -> &str;
}
