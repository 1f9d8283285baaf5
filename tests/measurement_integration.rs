//! End-to-end runs against the simulated bench.
//!
//! Every test runs with a paused Tokio clock, so the settle waits complete
//! instantly while the elapsed-time column still advances by the settle period.

use mag_sweep::config::RunConfig;
use mag_sweep::hardware::mock::VoltageRange;
use mag_sweep::hardware::SimulatedBench;
use mag_sweep::storage::HEADER;
use mag_sweep::sweep::{ChannelView, NullView};
use mag_sweep::{run_measurement, CancelHandle, LiveView, RunOutcome, SweepError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn test_config(dir: &Path) -> RunConfig {
    let mut config = RunConfig::default();
    config.storage.output_dir = dir.to_path_buf();
    config
}

fn bench_for(config: &RunConfig) -> SimulatedBench {
    SimulatedBench::new(
        &config.instruments.source,
        &config.instruments.meter_x,
        &config.instruments.meter_y,
    )
}

fn only_log(dir: &Path) -> PathBuf {
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected one run log, found {:?}", entries);
    entries.into_iter().next().unwrap()
}

fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

/// Requests a stop once a fixed number of samples has been pushed.
struct StopAfter {
    handle: CancelHandle,
    limit: usize,
    seen: AtomicUsize,
}

impl LiveView for StopAfter {
    fn push(&self, _x: f64, _y: f64) {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
            self.handle.cancel();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_run_records_every_interior_point() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config);
    let cancel = CancelHandle::new();

    let report = run_measurement(&config, &bench, cancel.view(), &NullView)
        .await
        .unwrap();

    assert!(report.completed());
    assert_eq!(report.points, 155);
    assert_eq!(report.samples_recorded, 153);
    assert_eq!(report.degraded_samples, 0);
    assert!(report.cleanup.is_clean());
    assert_eq!(report.log_path, only_log(dir.path()));

    let name = report.log_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("voltage_xy_log_"));
    assert!(name.ends_with(".csv"));

    let (header, rows) = read_rows(&report.log_path);
    assert_eq!(header, HEADER);
    assert_eq!(rows.len(), 153);
    // Second point of the forward pass is -9.5 V; meter X reads 0.02 * V.
    assert_eq!(rows[0][1], "-0.190000");
    assert_eq!(rows[0][0], "0.10");

    // 155 sweep writes (ending on 0 V), the loop's final zero, then the session's
    // zero on close.
    let history = bench.output_history();
    assert_eq!(history.len(), 157);
    assert_eq!(history[0], -10.0);
    assert_eq!(history[76], 10.0);
    assert_eq!(history[77], 10.0);
    assert_eq!(history[153], -10.0);
    assert_eq!(&history[154..], &[0.0, 0.0, 0.0]);

    assert_eq!(bench.coil_volts(), 0.0);
    assert!(!bench.source_enabled());
    assert_eq!(bench.open_handles(), 0);
    assert_eq!(bench.meter_reads(), 310);
}

#[tokio::test(start_paused = true)]
async fn test_live_view_receives_recorded_samples() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config);
    let (view, mut events) = ChannelView::new();

    let report = run_measurement(&config, &bench, CancelHandle::new().view(), &view)
        .await
        .unwrap();
    drop(view);

    let mut received = 0;
    while events.recv().await.is_some() {
        received += 1;
    }
    assert_eq!(received, report.samples_recorded);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_run_keeps_partial_log() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config);
    let cancel = CancelHandle::new();
    let view = StopAfter {
        handle: cancel.clone(),
        limit: 10,
        seen: AtomicUsize::new(0),
    };

    let report = run_measurement(&config, &bench, cancel.view(), &view)
        .await
        .unwrap();

    // Sample 10 is recorded at index 10; the stop is seen before index 11.
    assert_eq!(report.outcome, RunOutcome::Cancelled { at_index: 11 });
    assert!(!report.completed());
    assert_eq!(report.samples_recorded, 10);

    let (_, rows) = read_rows(&report.log_path);
    assert_eq!(rows.len(), 10);

    let history = bench.output_history();
    assert_eq!(history.len(), 11 + 3);
    assert_eq!(bench.coil_volts(), 0.0);
    assert!(!bench.source_enabled());
    assert_eq!(bench.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_records_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config);
    let cancel = CancelHandle::new();
    cancel.cancel();

    let report = run_measurement(&config, &bench, cancel.view(), &NullView)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled { at_index: 0 });
    assert_eq!(report.samples_recorded, 0);
    assert_eq!(bench.meter_reads(), 0);
    assert!(bench.output_history().iter().all(|v| *v == 0.0));

    let (header, rows) = read_rows(&report.log_path);
    assert_eq!(header, HEADER);
    assert!(rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_read_is_recorded_as_nan() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    // Reads 1 and 2 belong to the unrecorded first point; read 3 is meter X at step 1.
    let bench = bench_for(&config).fail_read(3);

    let report = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap();

    assert!(report.completed());
    assert_eq!(report.samples_recorded, 153);
    assert_eq!(report.degraded_samples, 1);

    let (_, rows) = read_rows(&report.log_path);
    assert_eq!(rows.len(), 153);
    assert_eq!(rows[0][1], "nan");
    assert_eq!(rows[0][2], "nan");
    assert_ne!(rows[1][1], "nan");
}

#[tokio::test(start_paused = true)]
async fn test_output_write_failure_aborts_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config).fail_output_write(5);
    let expected_volts = config.sequence().points()[4];

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    match err {
        SweepError::OutputWrite { volts, .. } => assert_eq!(volts, expected_volts),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bench.coil_volts(), 0.0);
    assert!(!bench.source_enabled());
    assert_eq!(bench.open_handles(), 0);

    // Indices 1..=3 were recorded before the failing write at index 4.
    let (_, rows) = read_rows(&only_log(dir.path()));
    assert_eq!(rows.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_output_is_an_output_error() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config).with_range(VoltageRange::Bipolar5V);

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    assert!(matches!(err, SweepError::OutputWrite { volts, .. } if volts == -10.0));
    assert!(err.to_string().contains("-10"));
    assert_eq!(bench.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_instrument_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config).with_unreachable(&config.instruments.meter_y);

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    assert!(err.is_setup_error());
    match &err {
        SweepError::InstrumentUnreachable { role, address, .. } => {
            assert_eq!(*role, "meter_y");
            assert_eq!(address, &config.instruments.meter_y);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(bench.journal().is_empty());
    assert!(bench.output_history().is_empty());
    assert_eq!(bench.open_handles(), 0);

    // The log was created before the instruments were opened.
    let (header, rows) = read_rows(&only_log(dir.path()));
    assert_eq!(header, HEADER);
    assert!(rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_output_channel_is_unreachable() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config).without_output();

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SweepError::InstrumentUnreachable {
            role: "analog output",
            ..
        }
    ));
    assert_eq!(bench.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_configuration_disables_source() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let bench = bench_for(&config).reject_command(&config.instruments.meter_x, "CONF");

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SweepError::Configuration {
            role: "meter_x",
            ..
        }
    ));
    assert!(!bench.source_enabled());
    assert_eq!(bench.output_history(), vec![0.0]);
    assert_eq!(bench.meter_reads(), 0);
    assert_eq!(bench.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_input_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.sweep.coarse.step = 0.0;
    let bench = bench_for(&config);

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    assert!(matches!(err, SweepError::InputValidation(_)));
    assert!(bench.journal().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_grid_is_input_error() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.sweep.fine.step = 1e-300;
    let bench = bench_for(&config);

    let err = run_measurement(&config, &bench, CancelHandle::new().view(), &NullView)
        .await
        .unwrap_err();

    assert!(matches!(err, SweepError::InputValidation(_)));
    assert!(err.to_string().contains("fine step"));
    assert!(bench.journal().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_source_configured_in_current_mode() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.source.mode = mag_sweep::hardware::SourceMode::Current;
    config.source.value = 0.002;
    let bench = bench_for(&config);
    let cancel = CancelHandle::new();
    cancel.cancel();

    run_measurement(&config, &bench, cancel.view(), &NullView)
        .await
        .unwrap();

    let commands = bench.commands_to(&config.instruments.source);
    assert_eq!(
        commands,
        vec![":SOUR:FUNC CURR", ":SOUR:CURR 0.002", ":OUTP ON", ":OUTP OFF"]
    );
}
