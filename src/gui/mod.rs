//! The eframe/egui front panel.
//!
//! Mirrors the bench operator form: source mode, three instrument addresses, seven
//! numeric fields, Start/Stop, and a live DMM2-vs-DMM1 plot. The measurement runs on
//! a Tokio runtime owned by the app; samples arrive over a channel and the final
//! result over a oneshot.

use crate::cancel::CancelHandle;
use crate::config::RunConfig;
use crate::control::{RunSlot, SweepForm};
use crate::error::SweepResult;
use crate::hardware::{InstrumentConnector, SimulatedBench, SourceMode, VisaConnector};
use crate::measurement::{run_measurement, RunReport};
use crate::sweep::{ChannelView, RunOutcome, SweepEvent};
use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints, Points};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

const REPAINT_INTERVAL: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

enum Dialog {
    Info { title: String, message: String },
    Error { title: String, message: String },
}

/// The main GUI struct.
pub struct SweepApp {
    runtime: tokio::runtime::Runtime,
    base: RunConfig,
    form: SweepForm,
    simulate: bool,
    cancel: CancelHandle,
    slot: RunSlot,
    samples: Vec<[f64; 2]>,
    events: Option<mpsc::UnboundedReceiver<SweepEvent>>,
    finished: Option<oneshot::Receiver<SweepResult<RunReport>>>,
    dialog: Option<Dialog>,
}

impl SweepApp {
    /// Build the app around `config`; `simulate` selects the simulated bench.
    pub fn new(config: RunConfig, simulate: bool) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sweep-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            form: SweepForm::from_config(&config),
            base: config,
            simulate,
            cancel: CancelHandle::new(),
            slot: RunSlot::new(),
            samples: Vec::new(),
            events: None,
            finished: None,
            dialog: None,
        })
    }

    fn running(&self) -> bool {
        self.slot.is_busy() || self.finished.is_some()
    }

    fn connector(&self, config: &RunConfig) -> Box<dyn InstrumentConnector> {
        if self.simulate {
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
        }
    }

    fn start(&mut self, ctx: &egui::Context) {
        let config = match self.form.to_config(&self.base) {
            Ok(config) => config,
            Err(err) => {
                self.dialog = Some(Dialog::Error {
                    title: "Input Error".to_string(),
                    message: err.to_string(),
                });
                return;
            }
        };
        let Some(ticket) = self.slot.try_begin() else {
            return;
        };

        self.cancel.reset();
        self.samples.clear();

        let connector = self.connector(&config);
        let (view, events) = ChannelView::new();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = self.cancel.view();
        let ctx = ctx.clone();

        self.runtime.spawn(async move {
            let result = run_measurement(&config, connector.as_ref(), cancel, &view).await;
            drop(ticket);
            let _ = done_tx.send(result);
            ctx.request_repaint();
        });

        self.events = Some(events);
        self.finished = Some(done_rx);
        info!("Measurement started from front panel");
    }

    fn poll(&mut self) {
        if let Some(events) = self.events.as_mut() {
            while let Ok(SweepEvent::Sample { x, y }) = events.try_recv() {
                if x.is_finite() && y.is_finite() {
                    self.samples.push([x, y]);
                }
            }
        }

        let Some(finished) = self.finished.as_mut() else {
            return;
        };
        let dialog = match finished.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => return,
            Ok(Ok(report)) => match report.outcome {
                RunOutcome::Completed => Some(Dialog::Info {
                    title: "Complete".to_string(),
                    message: "Measurement is completed.".to_string(),
                }),
                RunOutcome::Cancelled { .. } => None,
            },
            Ok(Err(err)) => {
                error!(error = %err, "Measurement failed");
                Some(Dialog::Error {
                    title: "Error".to_string(),
                    message: format!("An error occurred during execution: {}", err),
                })
            }
            Err(oneshot::error::TryRecvError::Closed) => Some(Dialog::Error {
                title: "Error".to_string(),
                message: "The measurement task ended unexpectedly.".to_string(),
            }),
        };

        self.finished = None;
        self.dialog = dialog;
    }

    fn form_ui(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let running = self.running();

        ui.group(|ui| {
            ui.label("Source Mode");
            ui.horizontal(|ui| {
                ui.radio_value(&mut self.form.source_mode, SourceMode::Voltage, "Voltage");
                ui.radio_value(&mut self.form.source_mode, SourceMode::Current, "Current");
            });
        });

        ui.group(|ui| {
            ui.label("Instrument Addresses");
            for (label, value) in self.form.address_fields_mut() {
                ui.horizontal(|ui| {
                    ui.label(label);
                    ui.text_edit_singleline(value);
                });
            }
        });

        for (label, value) in self.form.numeric_fields_mut() {
            ui.horizontal(|ui| {
                ui.label(label);
                ui.text_edit_singleline(value);
            });
        }

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if ui
                .add_enabled(!running, egui::Button::new("Start Measurement"))
                .clicked()
            {
                self.start(ctx);
            }
            if ui
                .add_enabled(running, egui::Button::new("Stop Measurement"))
                .clicked()
            {
                self.cancel.cancel();
            }
        });
    }

    fn plot_ui(&self, ui: &mut egui::Ui) {
        Plot::new("dmm_xy")
            .legend(Legend::default())
            .x_axis_label("DMM1 Voltage (V)")
            .y_axis_label("DMM2 Voltage (V)")
            .show(ui, |plot_ui| {
                plot_ui.line(
                    Line::new(PlotPoints::from(self.samples.clone())).name("DMM2 vs DMM1"),
                );
                plot_ui.points(Points::new(PlotPoints::from(self.samples.clone())).radius(2.5));
            });
    }

    fn dialog_ui(&mut self, ctx: &egui::Context) {
        let Some(dialog) = &self.dialog else {
            return;
        };
        let (title, message, color) = match dialog {
            Dialog::Info { title, message } => (title, message, ctx.style().visuals.text_color()),
            Dialog::Error { title, message } => (title, message, egui::Color32::LIGHT_RED),
        };

        let mut dismissed = false;
        egui::Window::new(title.as_str())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.colored_label(color, message.as_str());
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.dialog = None;
        }
    }
}

impl eframe::App for SweepApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll();

        egui::SidePanel::left("form_panel")
            .resizable(false)
            .min_width(320.0)
            .show(ctx, |ui| {
                ui.heading("Voltage/Current Sweep Controller");
                ui.separator();
                self.form_ui(ui, ctx);
                if self.running() {
                    ui.separator();
                    ui.label(format!("Running: {} samples", self.samples.len()));
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.plot_ui(ui);
        });

        self.dialog_ui(ctx);

        if self.running() {
            ctx.request_repaint_after(REPAINT_INTERVAL);
        }
    }
}

impl Drop for SweepApp {
    fn drop(&mut self) {
        // Closing the window stops an active run and waits for it to zero the coil.
        self.cancel.cancel();
        if let Some(finished) = self.finished.take() {
            let _ = self
                .runtime
                .block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, finished).await });
        }
    }
}
