//! Bench digital multimeter (Keysight 34401A-compatible SCPI).
//!
//! Configured once for auto-ranging DC volts, then polled with `READ?`, which
//! triggers a measurement and blocks until the reading is available.

use crate::hardware::capabilities::{Readable, Voltmeter};
use crate::hardware::scpi::{parse_f64_response, ScpiTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// SCPI bench multimeter used as a DC voltmeter.
pub struct Multimeter {
    transport: Box<dyn ScpiTransport>,
}

impl Multimeter {
    /// Wrap an open transport. No commands are sent.
    pub fn new(transport: Box<dyn ScpiTransport>) -> Self {
        Self { transport }
    }

    /// Instrument address.
    pub fn address(&self) -> &str {
        self.transport.address()
    }
}

#[async_trait]
impl Readable for Multimeter {
    async fn read(&self) -> Result<f64> {
        let response = self
            .transport
            .query("READ?")
            .await
            .with_context(|| format!("{}: READ? failed", self.address()))?;
        parse_f64_response(&response)
    }
}

#[async_trait]
impl Voltmeter for Multimeter {
    async fn configure_dc_voltage(&self) -> Result<()> {
        self.transport
            .command("CONF:VOLT:DC AUTO")
            .await
            .with_context(|| format!("{}: CONF:VOLT:DC AUTO failed", self.address()))
    }
}
