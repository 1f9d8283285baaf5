//! Instrument session.
//!
//! Owns the source unit, both multimeters and the coil output channel for the length
//! of one run. Opening reaches every resource before any of them is configured, so an
//! unreachable address never leaves a half-driven bench. [`InstrumentSession::close`]
//! zeroes the coil and switches the source off; each step is best effort and its
//! failure is reported, not raised.

use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::{AnalogOutput, SourceMode, SourceOutput, Voltmeter};
use crate::hardware::multimeter::Multimeter;
use crate::hardware::scpi::ScpiTransport;
use crate::hardware::source_meter::SourceMeter;
use crate::hardware::InstrumentConnector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// VISA addresses of the three SCPI instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAddresses {
    /// Source-measure unit biasing the sample
    pub source: String,
    /// Multimeter on the X channel (Hall probe)
    pub meter_x: String,
    /// Multimeter on the Y channel (sample response)
    pub meter_y: String,
}

impl Default for InstrumentAddresses {
    fn default() -> Self {
        Self {
            source: "GPIB0::01::INSTR".to_string(),
            meter_x: "GPIB0::02::INSTR".to_string(),
            meter_y: "GPIB0::03::INSTR".to_string(),
        }
    }
}

/// Everything needed to open a session. Fixed for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Voltage or current sourcing
    pub source_mode: SourceMode,
    /// Volts or amps
    pub source_value: f64,
    /// VISA addresses
    pub addresses: InstrumentAddresses,
    /// Coil output channel id
    pub analog_channel_id: String,
}

/// A cleanup step that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupFailure {
    /// Cleanup step that failed
    pub step: &'static str,
    /// Error chain
    pub reason: String,
}

/// Outcome of [`InstrumentSession::close`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    /// Failed steps, in order
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// True if every cleanup step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: &'static str, err: anyhow::Error) {
        let reason = format!("{:#}", err);
        warn!(step, %reason, "Cleanup step failed");
        self.failures.push(CleanupFailure { step, reason });
    }
}

struct Handles {
    source: Box<dyn SourceOutput>,
    meter_x: Box<dyn Voltmeter>,
    meter_y: Box<dyn Voltmeter>,
    output: Box<dyn AnalogOutput>,
}

/// Exclusive owner of the bench instruments for one run.
pub struct InstrumentSession {
    handles: Option<Handles>,
    channel: String,
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("channel", &self.channel)
            .field("open", &self.is_open())
            .finish()
    }
}

async fn open_role(
    connector: &dyn InstrumentConnector,
    role: &'static str,
    address: &str,
) -> SweepResult<Box<dyn ScpiTransport>> {
    connector
        .open_transport(address)
        .await
        .map_err(|e| SweepError::InstrumentUnreachable {
            role,
            address: address.to_string(),
            reason: format!("{:#}", e),
        })
}

fn configuration(role: &'static str) -> impl FnOnce(anyhow::Error) -> SweepError {
    move |e| SweepError::Configuration {
        role,
        reason: format!("{:#}", e),
    }
}

impl InstrumentSession {
    /// Open and configure every instrument.
    ///
    /// # Errors
    /// - `InstrumentUnreachable` if an address or the output channel cannot be
    ///   opened. Nothing has been configured at that point.
    /// - `Configuration` if an instrument rejects its setup. The session is closed
    ///   (output zeroed, source disabled) before returning.
    pub async fn open(
        config: &SessionConfig,
        connector: &dyn InstrumentConnector,
    ) -> SweepResult<Self> {
        let addresses = &config.addresses;
        let source = open_role(connector, "source", &addresses.source).await?;
        let meter_x = open_role(connector, "meter_x", &addresses.meter_x).await?;
        let meter_y = open_role(connector, "meter_y", &addresses.meter_y).await?;
        let output = connector
            .open_output(&config.analog_channel_id)
            .await
            .map_err(|e| SweepError::InstrumentUnreachable {
                role: "analog output",
                address: config.analog_channel_id.clone(),
                reason: format!("{:#}", e),
            })?;

        let mut session = Self::from_parts(
            Box::new(SourceMeter::new(source)),
            Box::new(Multimeter::new(meter_x)),
            Box::new(Multimeter::new(meter_y)),
            output,
        );

        if let Err(err) = session.configure(config).await {
            let cleanup = session.close().await;
            debug!(clean = cleanup.is_clean(), "Session closed after failed setup");
            return Err(err);
        }

        info!(
            source = %addresses.source,
            meter_x = %addresses.meter_x,
            meter_y = %addresses.meter_y,
            channel = %config.analog_channel_id,
            mode = %config.source_mode,
            value = config.source_value,
            "Instrument session open"
        );
        Ok(session)
    }

    /// Assemble a session from already-open devices. No configuration is sent.
    pub fn from_parts(
        source: Box<dyn SourceOutput>,
        meter_x: Box<dyn Voltmeter>,
        meter_y: Box<dyn Voltmeter>,
        output: Box<dyn AnalogOutput>,
    ) -> Self {
        let channel = output.channel().to_string();
        Self {
            handles: Some(Handles {
                source,
                meter_x,
                meter_y,
                output,
            }),
            channel,
        }
    }

    async fn configure(&self, config: &SessionConfig) -> SweepResult<()> {
        let handles = self.handles()?;
        handles
            .source
            .configure(config.source_mode, config.source_value)
            .await
            .map_err(configuration("source"))?;
        handles
            .source
            .enable_output()
            .await
            .map_err(configuration("source"))?;
        handles
            .meter_x
            .configure_dc_voltage()
            .await
            .map_err(configuration("meter_x"))?;
        handles
            .meter_y
            .configure_dc_voltage()
            .await
            .map_err(configuration("meter_y"))?;
        Ok(())
    }

    fn handles(&self) -> SweepResult<&Handles> {
        self.handles.as_ref().ok_or(SweepError::SessionClosed)
    }

    /// False after `close()`.
    pub fn is_open(&self) -> bool {
        self.handles.is_some()
    }

    /// Channel identifier of the coil output.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Drive the coil output to `volts`.
    pub async fn set_output(&self, volts: f64) -> SweepResult<()> {
        self.handles()?
            .output
            .write_voltage(volts)
            .await
            .map_err(|e| SweepError::OutputWrite {
                volts,
                reason: format!("{:#}", e),
            })
    }

    /// Read meter X then meter Y.
    ///
    /// A failed read on either meter yields `(NaN, NaN)`; meter Y is not queried
    /// once meter X has failed. Only a closed session is an error.
    pub async fn read_pair(&self) -> SweepResult<(f64, f64)> {
        let handles = self.handles()?;
        let pair = async {
            let x = handles.meter_x.read().await?;
            let y = handles.meter_y.read().await?;
            anyhow::Ok((x, y))
        }
        .await;

        match pair {
            Ok(pair) => Ok(pair),
            Err(err) => {
                warn!(error = %format!("{:#}", err), "Meter read failed, recording NaN");
                Ok((f64::NAN, f64::NAN))
            }
        }
    }

    /// Zero the output, disable the source and release every handle.
    ///
    /// Idempotent: later calls do nothing and return an empty report.
    pub async fn close(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let Some(handles) = self.handles.take() else {
            return report;
        };

        if let Err(err) = handles.output.write_voltage(0.0).await {
            report.record("zero output", err);
        }
        if let Err(err) = handles.source.disable_output().await {
            report.record("disable source", err);
        }
        drop(handles);

        info!(
            channel = %self.channel,
            failures = report.failures.len(),
            "Instrument session closed"
        );
        report
    }
}

impl Drop for InstrumentSession {
    fn drop(&mut self) {
        if self.handles.is_some() {
            warn!(
                channel = %self.channel,
                "Instrument session dropped without close; output was not zeroed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedBench;
    use tracing_test::traced_test;

    fn config() -> SessionConfig {
        SessionConfig {
            source_mode: SourceMode::Voltage,
            source_value: 1.0,
            addresses: InstrumentAddresses::default(),
            analog_channel_id: "Dev1/ao0".to_string(),
        }
    }

    fn bench() -> SimulatedBench {
        let addresses = InstrumentAddresses::default();
        SimulatedBench::new(&addresses.source, &addresses.meter_x, &addresses.meter_y)
    }

    #[tokio::test]
    async fn test_open_configures_in_order() {
        let bench = bench();
        let mut session = InstrumentSession::open(&config(), &bench).await.unwrap();

        let commands: Vec<String> = bench.journal().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            commands,
            vec![
                ":SOUR:FUNC VOLT",
                ":SOUR:VOLT 1",
                ":OUTP ON",
                "CONF:VOLT:DC AUTO",
                "CONF:VOLT:DC AUTO",
            ]
        );
        assert!(bench.source_enabled());
        assert_eq!(session.channel(), "Dev1/ao0");

        session.close().await;
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let bench = bench();
        let mut session = InstrumentSession::open(&config(), &bench).await.unwrap();
        assert!(session.close().await.is_clean());

        assert!(!session.is_open());
        assert!(matches!(
            session.set_output(1.0).await,
            Err(SweepError::SessionClosed)
        ));
        assert!(matches!(
            session.read_pair().await,
            Err(SweepError::SessionClosed)
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_read_pair_substitutes_nan() {
        let bench = bench().fail_read(1);
        let mut session = InstrumentSession::open(&config(), &bench).await.unwrap();

        let (x, y) = session.read_pair().await.unwrap();
        assert!(x.is_nan() && y.is_nan());
        // Meter Y is skipped once meter X fails.
        assert_eq!(bench.meter_reads(), 1);

        let (x, y) = session.read_pair().await.unwrap();
        assert!(!x.is_nan() && !y.is_nan());
        assert!(logs_contain("Meter read failed"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let bench = bench();
        let mut session = InstrumentSession::open(&config(), &bench).await.unwrap();
        session.set_output(2.5).await.unwrap();

        assert!(session.close().await.is_clean());
        assert!(session.close().await.is_clean());

        assert_eq!(bench.output_history(), vec![2.5, 0.0]);
        assert!(!bench.source_enabled());
        assert_eq!(bench.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_close_continues_after_failed_step() {
        // Writes: 1 = 2.5, 2 = zero on close.
        let bench = bench().fail_output_write(2);
        let mut session = InstrumentSession::open(&config(), &bench).await.unwrap();
        session.set_output(2.5).await.unwrap();

        let report = session.close().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "zero output");
        assert!(!bench.source_enabled());
        assert_eq!(bench.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_rejected_setup_closes_session() {
        let addresses = InstrumentAddresses::default();
        let bench = bench().reject_command(&addresses.meter_y, "CONF");

        let err = InstrumentSession::open(&config(), &bench).await.unwrap_err();
        assert!(matches!(
            err,
            SweepError::Configuration { role: "meter_y", .. }
        ));
        assert!(!bench.source_enabled());
        assert_eq!(bench.output_history(), vec![0.0]);
        assert_eq!(bench.open_handles(), 0);
    }
}
