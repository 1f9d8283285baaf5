//! Keithley 2400-series source-measure unit.
//!
//! Only the source side is used: the unit biases the sample at a fixed voltage or
//! current for the whole sweep.
//!
//! ## SCPI commands
//!
//! | Action            | Command                               |
//! |-------------------|---------------------------------------|
//! | voltage mode      | `:SOUR:FUNC VOLT`, `:SOUR:VOLT <v>`   |
//! | current mode      | `:SOUR:FUNC CURR`, `:SOUR:CURR <a>`   |
//! | output on / off   | `:OUTP ON` / `:OUTP OFF`              |

use crate::hardware::capabilities::{SourceMode, SourceOutput};
use crate::hardware::scpi::ScpiTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// SCPI source measure unit biasing the sample.
pub struct SourceMeter {
    transport: Box<dyn ScpiTransport>,
}

impl SourceMeter {
    /// Wrap an open transport. No commands are sent.
    pub fn new(transport: Box<dyn ScpiTransport>) -> Self {
        Self { transport }
    }

    /// Instrument address.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.transport
            .command(command)
            .await
            .with_context(|| format!("{}: '{}' failed", self.address(), command))
    }
}

#[async_trait]
impl SourceOutput for SourceMeter {
    async fn configure(&self, mode: SourceMode, value: f64) -> Result<()> {
        let (function, level) = match mode {
            SourceMode::Voltage => ("VOLT", format!(":SOUR:VOLT {}", value)),
            SourceMode::Current => ("CURR", format!(":SOUR:CURR {}", value)),
        };
        self.send(&format!(":SOUR:FUNC {}", function)).await?;
        self.send(&level).await?;
        debug!(address = self.address(), %mode, value, "Source configured");
        Ok(())
    }

    async fn enable_output(&self) -> Result<()> {
        self.send(":OUTP ON").await
    }

    async fn disable_output(&self) -> Result<()> {
        self.send(":OUTP OFF").await
    }
}
