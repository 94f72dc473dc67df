//! Control and shutdown coordination
//!
//! The [`Coordinator`] owns the run lifecycle:
//!
//! ```text
//! Idle --start()--> Running --(shutdown | loop stopped)--> Finalizing --> Terminated
//! ```
//!
//! It sends the single-byte start (`s`) and stop (`e`) commands through the
//! link's command half, and runs finalization exactly once no matter how
//! many threads ask for it: seal the store, export the history (skipped when
//! empty), release the command half, then raise the shutdown signal that
//! consumers wait on.
//!
//! Shutdown is cooperative. [`Coordinator::request_shutdown`] sends the stop
//! byte and waits for the acquisition loop to see the end-of-run marker or a
//! link failure. If the device ignores the stop byte for longer than the
//! configured grace period, the loop is cancelled and finalization proceeds
//! with whatever was collected.

use crate::export::Exporter;
use crate::link::LinkWriter;
use crate::store::StoreReader;
use crate::types::{AcquisitionState, LinkState, RunLifecycle};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Command byte that starts a run on the device
pub const START_COMMAND: u8 = b's';

/// Command byte that stops a run on the device
pub const STOP_COMMAND: u8 = b'e';

/// Outcome of finalization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    /// Number of samples written to the export file
    pub exported: usize,
    /// Export file, if one was written
    pub path: Option<PathBuf>,
    /// Export skipped because no sample was collected
    pub skipped_empty: bool,
    /// Export failure, if any (resources are released regardless)
    pub error: Option<String>,
}

/// Receiver side of the shutdown signal; clone freely
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Whether finalization has completed
    pub fn is_triggered(&self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Wait up to `timeout` for finalization; returns whether it completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Block until finalization has completed
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }
}

struct Inner {
    address: String,
    lifecycle: Mutex<RunLifecycle>,
    writer: Mutex<Option<LinkWriter>>,
    reader: StoreReader,
    exporter: Option<Exporter>,
    shutdown_requested: AtomicBool,
    stopped_tx: Sender<AcquisitionState>,
    stopped_rx: Receiver<AcquisitionState>,
    report: Mutex<Option<FinalizeReport>>,
    terminated_tx: Mutex<Option<Sender<()>>>,
    terminated_rx: Receiver<()>,
}

/// Control surface for one acquisition run; clones share the same run
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
    stop_grace: Option<Duration>,
    cancel: Arc<AtomicBool>,
}

impl Coordinator {
    /// Create a coordinator for a run
    ///
    /// `exporter` is `None` when exporting is disabled.
    pub fn new(writer: LinkWriter, reader: StoreReader, exporter: Option<Exporter>) -> Self {
        let (stopped_tx, stopped_rx) = bounded(1);
        let (terminated_tx, terminated_rx) = bounded(0);

        Self {
            inner: Arc::new(Inner {
                address: writer.address().to_string(),
                lifecycle: Mutex::new(RunLifecycle::Idle),
                writer: Mutex::new(Some(writer)),
                reader,
                exporter,
                shutdown_requested: AtomicBool::new(false),
                stopped_tx,
                stopped_rx,
                report: Mutex::new(None),
                terminated_tx: Mutex::new(Some(terminated_tx)),
                terminated_rx,
            }),
            stop_grace: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the acquisition loop if the device has not ended the run this
    /// long after the stop command (None = wait indefinitely)
    pub fn with_stop_grace(mut self, grace: Option<Duration>) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Share a cancel flag with the link manager and acquisition loop
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag the acquisition loop polls for cancellation
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Signal raised once finalization has completed
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.terminated_rx.clone(),
        }
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> RunLifecycle {
        *self.lifecycle_lock()
    }

    /// Whether finalization has completed
    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == RunLifecycle::Terminated
    }

    /// Report of the completed finalization, if any
    pub fn report(&self) -> Option<FinalizeReport> {
        lock(&self.inner.report).clone()
    }

    /// Send the start command; only the first call in `Idle` has an effect
    pub fn start(&self) -> crate::error::Result<()> {
        let mut lifecycle = self.lifecycle_lock();
        if *lifecycle != RunLifecycle::Idle {
            tracing::warn!("Start ignored: run is {}", *lifecycle);
            return Ok(());
        }
        if self.inner.shutdown_requested.load(Ordering::SeqCst) {
            tracing::warn!("Start ignored: shutdown already requested");
            return Ok(());
        }

        self.send_command(START_COMMAND)?;
        *lifecycle = RunLifecycle::Running;
        tracing::info!("Start command sent");
        Ok(())
    }

    /// Send the stop command, wait for the loop to stop, and finalize
    ///
    /// Concurrent and repeated calls send the stop byte once and all return
    /// the same report.
    pub fn request_shutdown(&self) -> FinalizeReport {
        if self.lifecycle().is_final() {
            return self.finalize();
        }
        if self.inner.shutdown_requested.swap(true, Ordering::SeqCst) {
            return self.wait_for_report();
        }

        tracing::info!("Shutdown requested");
        match self.link_state() {
            Some(LinkState::Open) => {
                if let Err(e) = self.send_command(STOP_COMMAND) {
                    tracing::warn!("Stop command not delivered: {}", e);
                }
            }
            Some(state) => {
                tracing::debug!("Link to {} is {}; stop command not sent", self.inner.address, state)
            }
            None => tracing::debug!("Command handle released; stop command not sent"),
        }

        self.await_acquisition_stop();
        self.finalize()
    }

    /// Record that the acquisition loop stopped, and finalize
    pub fn acquisition_stopped(&self, state: AcquisitionState) -> FinalizeReport {
        tracing::info!("Acquisition reported {}", state);
        let _ = self.inner.stopped_tx.try_send(state);
        self.finalize()
    }

    /// Run export and resource release exactly once
    ///
    /// Callers that arrive while another thread is finalizing block until it
    /// is done and get the same report.
    pub fn finalize(&self) -> FinalizeReport {
        {
            let mut lifecycle = self.lifecycle_lock();
            if lifecycle.is_final() {
                drop(lifecycle);
                return self.wait_for_report();
            }
            *lifecycle = RunLifecycle::Finalizing;
        }
        tracing::info!("Finalizing run");

        let history = self.inner.reader.seal();
        self.cancel.store(true, Ordering::SeqCst);

        let report = self.export(&history);

        if let Some(mut writer) = lock(&self.inner.writer).take() {
            writer.close();
        }

        *lock(&self.inner.report) = Some(report.clone());
        *self.lifecycle_lock() = RunLifecycle::Terminated;
        lock(&self.inner.terminated_tx).take();

        tracing::info!("Run terminated");
        report
    }

    fn export(&self, history: &[crate::types::Sample]) -> FinalizeReport {
        if history.is_empty() {
            tracing::info!("No samples collected; skipping export");
            return FinalizeReport {
                skipped_empty: true,
                ..Default::default()
            };
        }

        let Some(exporter) = &self.inner.exporter else {
            tracing::debug!("Export disabled; {} sample(s) not written", history.len());
            return FinalizeReport::default();
        };

        match exporter.write(history) {
            Ok(exported) => FinalizeReport {
                exported,
                path: Some(exporter.path().to_path_buf()),
                ..Default::default()
            },
            Err(e) => {
                tracing::error!("{}", e);
                FinalizeReport {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    fn await_acquisition_stop(&self) {
        let stopped = match self.stop_grace {
            Some(grace) => match self.inner.stopped_rx.recv_timeout(grace) {
                Ok(state) => Some(state),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "Device did not end the run within {:?}; cancelling acquisition",
                        grace
                    );
                    self.cancel.store(true, Ordering::SeqCst);
                    None
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.inner.stopped_rx.recv().ok(),
        };

        if let Some(state) = stopped {
            tracing::debug!("Acquisition stopped as {} before finalization", state);
        }
    }

    fn wait_for_report(&self) -> FinalizeReport {
        let _ = self.inner.terminated_rx.recv();
        self.report().unwrap_or_default()
    }

    fn link_state(&self) -> Option<LinkState> {
        lock(&self.inner.writer).as_ref().map(LinkWriter::state)
    }

    fn send_command(&self, command: u8) -> crate::error::Result<()> {
        match lock(&self.inner.writer).as_mut() {
            Some(writer) => writer.write(&[command]),
            None => Err(crate::error::TelemetryError::ConnectionLost {
                address: self.inner.address.clone(),
                reason: "command handle released".to_string(),
            }),
        }
    }

    fn lifecycle_lock(&self) -> MutexGuard<'_, RunLifecycle> {
        lock(&self.inner.lifecycle)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
