//! Integration tests for start/stop control and finalization
//!
//! These tests validate:
//! - Start and stop command bytes reach the device exactly once
//! - Finalization runs once across user and acquisition triggers
//! - A device that ignores the stop command is cancelled after the grace period
//! - Cancellation while the link is still retrying

mod common;

use common::builders::{sample_lines, ConfigBuilder};
use common::mock_helpers::launch;
use common::{read_export, test_timeout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_rs::link::{ScriptStep, ScriptedDevice};
use telemetry_rs::session::Session;
use telemetry_rs::{AcquisitionState, RunLifecycle, StoreReader, TelemetryError};

fn wait_for_samples(reader: &StoreReader, count: usize) {
    let deadline = Instant::now() + test_timeout();
    while reader.len() < count {
        assert!(Instant::now() < deadline, "timed out waiting for {} samples", count);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_start_then_stop_with_end_marker() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedDevice::new()
        .requiring_start()
        .with_lines(sample_lines(3, 50))
        .on_stop([ScriptStep::line("I (100) encoder: Fim")]);

    let running = launch(&device, ConfigBuilder::new(dir.path()));
    let coordinator = running.coordinator().clone();
    assert_eq!(coordinator.lifecycle(), RunLifecycle::Idle);

    coordinator.start().unwrap();
    assert_eq!(coordinator.lifecycle(), RunLifecycle::Running);
    wait_for_samples(running.reader(), 3);

    let report = coordinator.request_shutdown();
    assert_eq!(report.exported, 3);
    assert_eq!(device.commands(), b"se".to_vec());

    let summary = running.wait().unwrap();
    assert_eq!(summary.acquisition, AcquisitionState::StoppedClean);
    assert_eq!(summary.export, report);
}

#[test]
fn test_silent_device_is_cancelled_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedDevice::new()
        .requiring_start()
        .halting_on_stop()
        .with_lines(sample_lines(2, 50));

    let running = launch(&device, ConfigBuilder::new(dir.path()).stop_grace_ms(Some(50)));
    let coordinator = running.coordinator().clone();
    coordinator.start().unwrap();
    wait_for_samples(running.reader(), 2);

    let began = Instant::now();
    let report = coordinator.request_shutdown();
    assert!(began.elapsed() >= Duration::from_millis(50));
    assert_eq!(report.exported, 2);

    let summary = running.wait().unwrap();
    assert_eq!(summary.acquisition, AcquisitionState::StoppedCancelled);
    assert_eq!(read_export(&dir.path().join("received_data.txt")).len(), 2);
}

#[test]
fn test_shutdown_requests_race_acquisition_end() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedDevice::new()
        .with_lines(sample_lines(50, 50))
        .with_lines(["Fim"]);

    let running = launch(&device, ConfigBuilder::new(dir.path()));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = running.coordinator().clone();
            std::thread::spawn(move || coordinator.request_shutdown())
        })
        .collect();
    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let summary = running.wait().unwrap();

    assert!(reports.iter().all(|r| *r == summary.export));
    // Zero if the run had already finalized before the first request
    assert!(device.commands().iter().filter(|&&b| b == b'e').count() <= 1);

    let exported = read_export(&dir.path().join("received_data.txt"));
    assert_eq!(exported.len(), summary.export.exported);
    assert_eq!(exported.len() as u64, summary.stats.samples);
}

#[test]
fn test_shutdown_before_start_skips_export() {
    // A device that was never started does not answer the stop command
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedDevice::new()
        .requiring_start()
        .on_stop([ScriptStep::line("Fim")]);

    let running = launch(&device, ConfigBuilder::new(dir.path()).stop_grace_ms(Some(20)));
    let report = running.coordinator().request_shutdown();

    assert!(report.skipped_empty);
    assert!(!dir.path().join("received_data.txt").exists());
    assert_eq!(device.commands(), b"e".to_vec());

    let summary = running.wait().unwrap();
    assert_eq!(summary.acquisition, AcquisitionState::StoppedCancelled);
}

#[test]
fn test_start_after_termination_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedDevice::new().with_lines(["1.0,2.0,0", "Fim"]);

    let running = launch(&device, ConfigBuilder::new(dir.path()));
    let coordinator = running.coordinator().clone();
    running.wait().unwrap();

    assert!(coordinator.is_terminated());
    assert!(coordinator.start().is_ok());
    assert!(device.commands().is_empty());
}

#[test]
fn test_cancel_aborts_open_retries() {
    let dir = tempfile::tempdir().unwrap();
    let device = ScriptedDevice::new().failing_opens(u32::MAX);
    let cancel = Arc::new(AtomicBool::new(false));

    let flag = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
    });

    let result = Session::new(ConfigBuilder::new(dir.path()).build())
        .with_cancel_flag(cancel)
        .launch(Box::new(device.connector()));
    canceller.join().unwrap();

    assert!(matches!(result, Err(TelemetryError::ConnectionUnavailable { .. })));
    assert!(device.open_attempts() > 1);
}
