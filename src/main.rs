//! CLI Entry Point for mag_sweep
//!
//! Provides a headless command-line interface for:
//! - Running a sweep against VISA instruments or a simulated bench
//! - Previewing the voltage sequence a configuration produces
//!
//! # Usage
//!
//! Run a sweep (Ctrl+C stops it and zeroes the coil):
//! ```bash
//! mag_sweep run --config config/mag_sweep.toml
//! mag_sweep run --simulate --output-dir runs/
//! ```
//!
//! Preview the sequence:
//! ```bash
//! mag_sweep plan --json
//! ```
//!
//! Print the effective configuration (defaults, file and `MAG_SWEEP_*` overrides):
//! ```bash
//! mag_sweep config > config/mag_sweep.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mag_sweep::config::{RunConfig, DEFAULT_CONFIG_PATH};
use mag_sweep::hardware::{InstrumentConnector, SimulatedBench, VisaConnector};
use mag_sweep::logging::{self, OutputFormat, TracingConfig};
use mag_sweep::sweep::LiveView;
use mag_sweep::{run_measurement, CancelHandle, RunOutcome};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "mag_sweep")]
#[command(about = "Magnetic field response sweep controller", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    /// Log span open/close events (per-run `sweep` span)
    #[arg(long, global = true)]
    log_spans: bool,

    /// Disable ANSI colors in log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sweep and write its CSV log
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use the simulated bench instead of VISA instruments
        #[arg(long)]
        simulate: bool,

        /// Directory for the run log (overrides storage.output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Print the voltage sequence without touching any instrument
    Plan {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Emit JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

/// Logs progress every few samples.
struct ProgressView {
    seen: AtomicUsize,
    total: usize,
}

impl LiveView for ProgressView {
    fn push(&self, x: f64, y: f64) {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(sample = seen, x, y, "Sample");
        if seen % 25 == 0 || seen == self.total {
            info!("{}/{} samples", seen, self.total);
        }
    }
}

/// Logging options collected from the global flags.
#[derive(Debug, Clone, Copy)]
struct LogFlags {
    format: OutputFormat,
    spans: bool,
    color: bool,
}

impl LogFlags {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.log_format,
            spans: cli.log_spans,
            color: !cli.no_color,
        }
    }

    fn tracing_config(self, level: Level) -> TracingConfig {
        TracingConfig::new(level)
            .with_format(self.format)
            .with_span_events(self.spans)
            .with_ansi(self.color)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logs = LogFlags::from_cli(&cli);

    match cli.command {
        Commands::Run {
            config,
            simulate,
            output_dir,
        } => {
            let mut config = load(&config, logs)?;
            if let Some(dir) = output_dir {
                config.storage.output_dir = dir;
            }
            run(config, simulate).await
        }
        Commands::Plan { config, json } => {
            let config = load(&config, logs)?;
            plan(&config, json)
        }
        Commands::Config { config } => {
            let config = load(&config, logs)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load(path: &Path, logs: LogFlags) -> Result<RunConfig> {
    let config = RunConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    let level = logging::parse_log_level(&config.application.log_level)
        .map_err(anyhow::Error::msg)?;
    logging::init(logs.tracing_config(level)).map_err(anyhow::Error::msg)?;
    Ok(config)
}

async fn run(config: RunConfig, simulate: bool) -> Result<()> {
    let connector: Box<dyn InstrumentConnector> = if simulate {
        info!("Using simulated bench");
        Box::new(
            SimulatedBench::new(
                &config.instruments.source,
                &config.instruments.meter_x,
                &config.instruments.meter_y,
            )
            .with_noise(1e-5),
        )
    } else {
        Box::new(VisaConnector::new(
            config.timeout(),
            config.output.resource.clone(),
            &config.output.command_template,
        ))
    };

    let cancel = CancelHandle::new();
    cancel.reset();
    let stop = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let view = ProgressView {
        seen: AtomicUsize::new(0),
        total: config.sequence().recorded_len(),
    };
    let result = run_measurement(&config, connector.as_ref(), cancel.view(), &view).await;
    stop.abort();

    let report = result.context("Measurement failed")?;
    match report.outcome {
        RunOutcome::Completed => println!(
            "Measurement is completed: {} samples ({} degraded) written to {}",
            report.samples_recorded,
            report.degraded_samples,
            report.log_path.display()
        ),
        RunOutcome::Cancelled { at_index } => println!(
            "Measurement stopped by user at point {} of {}; {} samples kept in {}",
            at_index,
            report.points,
            report.samples_recorded,
            report.log_path.display()
        ),
    }
    for failure in &report.cleanup.failures {
        eprintln!("warning: cleanup step '{}' failed: {}", failure.step, failure.reason);
    }
    Ok(())
}

fn plan(config: &RunConfig, json: bool) -> Result<()> {
    config.validate()?;
    let sequence = config.sequence();
    let estimated_seconds = sequence.len() as f64 * config.settle().as_secs_f64();

    if json {
        let out = serde_json::json!({
            "points": sequence.points(),
            "forward_len": sequence.forward().len(),
            "recorded": sequence.recorded_len(),
            "settle_ms": config.sweep.settle_ms,
            "estimated_seconds": estimated_seconds,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", sequence.summary());
        println!(
            "Minimum duration at {} ms settle: {:.1} s",
            config.sweep.settle_ms, estimated_seconds
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_flags_reach_tracing_config() {
        let cli = Cli::try_parse_from(["mag_sweep", "--log-spans", "--no-color", "plan"]).unwrap();
        let config = LogFlags::from_cli(&cli).tracing_config(Level::DEBUG);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
        assert_eq!(config.format, OutputFormat::Compact);
        assert_eq!(config.level, Level::DEBUG);
    }

    #[test]
    fn test_log_flags_default_to_colored_without_spans() {
        let cli =
            Cli::try_parse_from(["mag_sweep", "run", "--simulate", "--log-format", "json"]).unwrap();
        let config = LogFlags::from_cli(&cli).tracing_config(Level::INFO);
        assert!(!config.with_span_events);
        assert!(config.with_ansi);
        assert_eq!(config.format, OutputFormat::Json);
    }
}
