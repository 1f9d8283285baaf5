//! SCPI-programmed analog output.
//!
//! Drives the coil through any instrument whose output level is set by a single SCPI
//! command: a DAQ front-end with a SCPI shell, a programmable DC supply, or a
//! function generator in DC mode. The command comes from a template with a `{volts}`
//! placeholder, e.g. `SOUR:VOLT {volts}` or `APPL:DC DEF,DEF,{volts}`. Templates may
//! also reference `{channel}`.

use crate::hardware::capabilities::AnalogOutput;
use crate::hardware::scpi::ScpiTransport;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::trace;

/// Default write command.
pub const DEFAULT_COMMAND_TEMPLATE: &str = "SOUR:VOLT {volts}";

/// Render `template` for `volts` (six decimals) on `channel`.
pub fn render_command(template: &str, channel: &str, volts: f64) -> Result<String> {
    let mut vars = HashMap::new();
    vars.insert("volts".to_string(), format!("{:.6}", volts));
    vars.insert("channel".to_string(), channel.to_string());
    strfmt::strfmt(template, &vars)
        .map_err(|e| anyhow!("Invalid output command template '{}': {}", template, e))
}

/// Check a template renders and actually uses the level.
pub fn validate_template(template: &str) -> Result<()> {
    if !template.contains("{volts}") {
        bail!(
            "Output command template '{}' has no {{volts}} placeholder",
            template
        );
    }
    render_command(template, "ao0", 0.0).map(|_| ())
}

/// Coil output driven by one templated SCPI command per level.
pub struct ScpiAnalogOutput {
    transport: Box<dyn ScpiTransport>,
    channel: String,
    template: String,
}

impl ScpiAnalogOutput {
    /// Reserve `channel` on `transport`, writing levels with `template`.
    pub fn new(transport: Box<dyn ScpiTransport>, channel: &str, template: &str) -> Result<Self> {
        validate_template(template)?;
        Ok(Self {
            transport,
            channel: channel.to_string(),
            template: template.to_string(),
        })
    }
}

#[async_trait]
impl AnalogOutput for ScpiAnalogOutput {
    async fn write_voltage(&self, volts: f64) -> Result<()> {
        let command = render_command(&self.template, &self.channel, volts)?;
        trace!(channel = %self.channel, %command, "Analog output write");
        self.transport
            .command(&command)
            .await
            .with_context(|| format!("Channel {}: '{}' failed", self.channel, command))
    }

    fn channel(&self) -> &str {
        &self.channel
    }
}
