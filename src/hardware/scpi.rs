//! Common SCPI communication abstractions.
//!
//! Every instrument in the sweep speaks SCPI. Drivers are written against
//! [`ScpiTransport`] so the same Keithley or multimeter driver runs over VISA on the
//! bench and over a scripted or simulated transport in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Trait for SCPI communication transports.
///
/// Abstracts the underlying communication mechanism (VISA, simulation) to enable
/// protocol-agnostic SCPI operations.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a query command and return the response (trimmed).
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn command(&self, command: &str) -> Result<()>;

    /// Resource address this transport was opened on.
    fn address(&self) -> &str;
}

/// Parse a floating-point response from SCPI query.
///
/// Handles common SCPI response formats such as `+1.234560E-03`.
pub fn parse_f64_response(response: &str) -> Result<f64> {
    response
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Failed to parse SCPI response as f64: '{}'", response))
}
