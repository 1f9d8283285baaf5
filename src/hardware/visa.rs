//! VISA transport for GPIB/USB/Ethernet instruments
//!
//! Wraps the `visa-rs` crate. VISA calls block, so every query and command runs on
//! Tokio's blocking thread pool.
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)

use crate::hardware::analog_output::ScpiAnalogOutput;
use crate::hardware::capabilities::AnalogOutput;
use crate::hardware::scpi::ScpiTransport;
use crate::hardware::InstrumentConnector;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use anyhow::Context;
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// Open resource plus the resource manager that owns its session.
///
/// Field order matters: the instrument must close before the manager.
#[cfg(feature = "instrument_visa")]
struct VisaLink {
    instr: Instrument,
    _rm: DefaultRM,
}

/// SCPI over one VISA resource.
pub struct VisaTransport {
    address: String,
    #[cfg(feature = "instrument_visa")]
    link: Arc<Mutex<VisaLink>>,
}

impl VisaTransport {
    /// Open `address`, waiting at most `timeout` for the resource.
    #[cfg(feature = "instrument_visa")]
    pub async fn open(address: &str, timeout: Duration) -> Result<Self> {
        let resource = address.to_string();
        let link = tokio::task::spawn_blocking(move || -> Result<VisaLink> {
            let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
            let name = std::ffi::CString::new(resource.as_str())
                .with_context(|| format!("Invalid VISA resource string '{}'", resource))?;
            let instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .with_context(|| format!("Failed to open VISA resource {}", resource))?;
            Ok(VisaLink { instr, _rm: rm })
        })
        .await
        .context("VISA open task panicked")??;

        debug!(address, "VISA resource opened");
        Ok(Self {
            address: address.to_string(),
            link: Arc::new(Mutex::new(link)),
        })
    }

    /// Always fails: built without the `instrument_visa` feature.
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(_address: &str, _timeout: Duration) -> Result<Self> {
        Err(anyhow!(
            "VISA support not enabled. Rebuild with --features instrument_visa"
        ))
    }

    #[cfg(feature = "instrument_visa")]
    async fn exchange(&self, command: &str, expect_reply: bool) -> Result<String> {
        use std::io::{BufRead, BufReader, Write};

        let link = self.link.clone();
        let line = format!("{}\n", command);
        let command = command.to_string();
        let address = self.address.clone();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut guard = link
                .lock()
                .map_err(|_| anyhow!("{}: VISA session lock poisoned", address))?;
            guard
                .instr
                .write_all(line.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command))?;
            if !expect_reply {
                return Ok(String::new());
            }
            let mut response = String::new();
            BufReader::new(&guard.instr)
                .read_line(&mut response)
                .with_context(|| format!("VISA read failed for: {}", command))?;
            Ok(response.trim().to_string())
        })
        .await
        .context("VISA I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn exchange(&self, _command: &str, _expect_reply: bool) -> Result<String> {
        Err(anyhow!(
            "VISA support not enabled. Rebuild with --features instrument_visa"
        ))
    }
}

#[async_trait]
impl ScpiTransport for VisaTransport {
    async fn query(&self, command: &str) -> Result<String> {
        self.exchange(command, true).await
    }

    async fn command(&self, command: &str) -> Result<()> {
        self.exchange(command, false).await.map(|_| ())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Opens bench instruments over VISA.
///
/// The coil output is a SCPI instrument at `output_resource`; each level is sent
/// with `command_template`.
pub struct VisaConnector {
    timeout: Duration,
    output_resource: Option<String>,
    command_template: String,
}

impl VisaConnector {
    /// Connector with an open `timeout` and the coil output resource.
    pub fn new(timeout: Duration, output_resource: Option<String>, command_template: &str) -> Self {
        Self {
            timeout,
            output_resource,
            command_template: command_template.to_string(),
        }
    }
}

#[async_trait]
impl InstrumentConnector for VisaConnector {
    async fn open_transport(&self, address: &str) -> Result<Box<dyn ScpiTransport>> {
        Ok(Box::new(VisaTransport::open(address, self.timeout).await?))
    }

    async fn open_output(&self, channel_id: &str) -> Result<Box<dyn AnalogOutput>> {
        let resource = self.output_resource.as_deref().ok_or_else(|| {
            anyhow!(
                "No VISA resource configured for analog output {} (set output.resource)",
                channel_id
            )
        })?;
        let transport = VisaTransport::open(resource, self.timeout).await?;
        let output = ScpiAnalogOutput::new(Box::new(transport), channel_id, &self.command_template)?;
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::analog_output::DEFAULT_COMMAND_TEMPLATE;

    #[tokio::test]
    async fn test_output_without_resource_is_error() {
        let connector = VisaConnector::new(Duration::from_millis(100), None, DEFAULT_COMMAND_TEMPLATE);
        let err = connector.open_output("Dev1/ao0").await.err().unwrap();
        assert!(err.to_string().contains("Dev1/ao0"));
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn test_disabled_feature_message() {
        let err = VisaTransport::open("GPIB0::01::INSTR", Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("instrument_visa"));
    }
}
