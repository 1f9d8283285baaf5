//! Front panel for the magnetic response sweep.
//!
//! ```bash
//! mag_sweep_gui --config config/mag_sweep.toml
//! mag_sweep_gui --simulate
//! ```

use clap::Parser;
use eframe::egui;
use mag_sweep::config::{RunConfig, DEFAULT_CONFIG_PATH};
use mag_sweep::gui::SweepApp;
use mag_sweep::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mag_sweep_gui")]
#[command(about = "Voltage/Current Sweep Controller", long_about = None)]
struct Args {
    /// Configuration file supplying defaults for the form
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated bench instead of VISA instruments
    #[arg(long)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = RunConfig::load_from(&args.config)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    tracing::info!(simulate = args.simulate, "Starting sweep front panel");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 640.0])
            .with_min_inner_size([760.0, 480.0])
            .with_title("Voltage/Current Sweep Controller"),
        ..Default::default()
    };

    let app = SweepApp::new(config, args.simulate)?;
    eframe::run_native(
        "Voltage/Current Sweep Controller",
        options,
        Box::new(move |_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {}", e))
}
