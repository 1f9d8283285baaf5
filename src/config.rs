//! Run configuration using Figment
//!
//! Strongly-typed configuration for one sweep. Values are layered:
//! 1. built-in defaults (the operator form defaults)
//! 2. a TOML file, `config/mag_sweep.toml` unless another path is given
//! 3. environment variables prefixed with `MAG_SWEEP_`, using `__` between keys
//!
//! # Example
//! ```no_run
//! use mag_sweep::config::RunConfig;
//!
//! let config = RunConfig::load()?;
//! println!("Coarse step: {} V", config.sweep.coarse.step);
//! # Ok::<(), mag_sweep::error::SweepError>(())
//! ```
//!
//! `MAG_SWEEP_SWEEP__SETTLE_MS=100` overrides `sweep.settle_ms`.

use crate::error::{SweepError, SweepResult};
use crate::hardware::analog_output::{validate_template, DEFAULT_COMMAND_TEMPLATE};
use crate::hardware::capabilities::SourceMode;
use crate::sequence::{self, RangeSpec, VoltageSequence};
use crate::session::{InstrumentAddresses, SessionConfig};
use crate::storage::log_file_name;
use chrono::{DateTime, Local};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/mag_sweep.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MAG_SWEEP_";

/// Top-level run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Source unit mode and level
    pub source: SourceConfig,
    /// Instrument addresses and I/O timeout
    pub instruments: InstrumentsConfig,
    /// Sweep ranges and timing
    pub sweep: SweepConfig,
    /// Coil output backend
    pub output: OutputConfig,
    /// Run log location
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Source unit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Voltage or current sourcing
    pub mode: SourceMode,
    /// Volts or amps, depending on `mode`
    pub value: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Voltage,
            value: 1.0,
        }
    }
}

/// Instrument addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Source unit VISA address
    pub source: String,
    /// Multimeter 1 (X axis) VISA address
    pub meter_x: String,
    /// Multimeter 2 (Y axis) VISA address
    pub meter_y: String,
    /// Coil output channel identifier
    pub analog_channel: String,
    /// Resource open timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        let addresses = InstrumentAddresses::default();
        Self {
            source: addresses.source,
            meter_x: addresses.meter_x,
            meter_y: addresses.meter_y,
            analog_channel: "Dev1/ao0".to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    2000
}

/// Sweep ranges and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Wait after each output write, in milliseconds
    pub settle_ms: u64,
    /// Full-span coarse range
    pub coarse: RangeSpec,
    /// Fine range replacing coarse points inside it
    pub fine: RangeSpec,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            settle_ms: 50,
            coarse: RangeSpec::new(-10.0, 10.0, 0.5),
            fine: RangeSpec::new(-1.0, 1.0, 0.05),
        }
    }
}

/// Coil output backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// VISA resource hosting the coil output (VISA backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// SCPI command written per point; `{volts}` and `{channel}` are substituted
    pub command_template: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            resource: None,
            command_template: DEFAULT_COMMAND_TEMPLATE.to_string(),
        }
    }
}

/// Run log location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory run logs are written to
    pub output_dir: PathBuf,
    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "voltage_xy_log".to_string(),
        }
    }
}

impl StorageConfig {
    /// Log path for a run started at `started`.
    pub fn log_path(&self, started: DateTime<Local>) -> PathBuf {
        self.output_dir
            .join(log_file_name(&self.file_prefix, started))
    }
}

impl RunConfig {
    /// Load configuration from `config/mag_sweep.toml` and environment variables.
    pub fn load() -> SweepResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SweepResult<Self> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(SweepError::from)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RunConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> SweepResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SweepError::InputValidation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !self.source.value.is_finite() {
            return Err(SweepError::InputValidation(format!(
                "Source value must be a finite number, got {}",
                self.source.value
            )));
        }

        self.sweep
            .coarse
            .validate("coarse")
            .and_then(|_| self.sweep.fine.validate("fine"))
            .map_err(SweepError::InputValidation)?;

        let addresses = [
            ("instruments.source", &self.instruments.source),
            ("instruments.meter_x", &self.instruments.meter_x),
            ("instruments.meter_y", &self.instruments.meter_y),
            ("instruments.analog_channel", &self.instruments.analog_channel),
        ];
        for (key, value) in addresses {
            if value.trim().is_empty() {
                return Err(SweepError::InputValidation(format!("{} is empty", key)));
            }
        }

        validate_template(&self.output.command_template)
            .map_err(|e| SweepError::InputValidation(e.to_string()))?;

        if self.storage.file_prefix.trim().is_empty() {
            return Err(SweepError::InputValidation(
                "storage.file_prefix is empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Session parameters for this run.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            source_mode: self.source.mode,
            source_value: self.source.value,
            addresses: InstrumentAddresses {
                source: self.instruments.source.clone(),
                meter_x: self.instruments.meter_x.clone(),
                meter_y: self.instruments.meter_y.clone(),
            },
            analog_channel_id: self.instruments.analog_channel.clone(),
        }
    }

    /// The traversal sequence described by the sweep ranges.
    pub fn sequence(&self) -> VoltageSequence {
        sequence::build(self.sweep.coarse, self.sweep.fine)
    }

    /// Settle wait after each output write.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.sweep.settle_ms)
    }

    /// Instrument open timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.instruments.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequence().len(), 155);
        assert_eq!(config.settle(), Duration::from_millis(50));
        assert_eq!(config.session().addresses.meter_y, "GPIB0::03::INSTR");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RunConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(SweepError::InputValidation(_))
        ));
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut config = RunConfig::default();
        config.sweep.fine.step = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fine"));
    }

    #[test]
    fn test_bad_template_rejected() {
        let mut config = RunConfig::default();
        config.output.command_template = "SOUR:VOLT 1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_file_and_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        std::fs::write(
            &path,
            r#"
            [source]
            mode = "current"
            value = 0.002

            [sweep.fine]
            start = -0.5
            end = 0.5
            step = 0.01
            "#,
        )
        .unwrap();
        std::env::set_var("MAG_SWEEP_SWEEP__SETTLE_MS", "120");
        std::env::set_var("MAG_SWEEP_INSTRUMENTS__METER_X", "GPIB0::12::INSTR");

        let loaded = RunConfig::load_from(&path);
        std::env::remove_var("MAG_SWEEP_SWEEP__SETTLE_MS");
        std::env::remove_var("MAG_SWEEP_INSTRUMENTS__METER_X");

        let config = loaded.unwrap();
        assert_eq!(config.source.mode, SourceMode::Current);
        assert_eq!(config.source.value, 0.002);
        assert_eq!(config.sweep.fine, RangeSpec::new(-0.5, 0.5, 0.01));
        assert_eq!(config.sweep.coarse, RangeSpec::new(-10.0, 10.0, 0.5));
        assert_eq!(config.sweep.settle_ms, 120);
        assert_eq!(config.instruments.meter_x, "GPIB0::12::INSTR");
        assert_eq!(config.instruments.source, "GPIB0::01::INSTR");
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_replaces_malformed_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[sweep]\nsettle_ms = \"soon\"\n").unwrap();
        std::env::set_var("MAG_SWEEP_SWEEP__SETTLE_MS", "120");

        let loaded = RunConfig::load_from(&path);
        std::env::remove_var("MAG_SWEEP_SWEEP__SETTLE_MS");

        assert_eq!(loaded.unwrap().sweep.settle_ms, 120);
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[sweep]\nsettle_ms = \"soon\"\n").unwrap();
        assert!(matches!(
            RunConfig::load_from(&path),
            Err(SweepError::Config(_))
        ));
    }
}
