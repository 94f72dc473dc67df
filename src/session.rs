//! Run orchestration
//!
//! A [`Session`] wires the pipeline together from an [`AppConfig`]:
//!
//! 1. Open the sample store with the configured window geometry
//! 2. Open the link through the [`LinkManager`], retrying per the config
//! 3. Hand the link's command half to a [`Coordinator`]
//! 4. Spawn the acquisition loop on its own thread
//!
//! When the loop reaches a terminal state it reports to the coordinator,
//! which finalizes the run. A user-requested shutdown goes through
//! [`Coordinator::request_shutdown`] instead; either way finalization runs
//! exactly once. [`RunningSession::wait`] joins the acquisition thread and
//! returns a [`RunSummary`].
//!
//! # Example
//!
//! ```ignore
//! let running = Session::new(AppConfig::default())
//!     .launch(Box::new(SerialConnector::new(Duration::from_millis(100))))?;
//!
//! running.coordinator().start()?;
//! // ... later
//! running.coordinator().request_shutdown();
//! let summary = running.wait()?;
//! ```

use crate::acquisition::{AcquisitionEvent, AcquisitionLoop, AcquisitionReport};
use crate::config::AppConfig;
use crate::coordinator::{Coordinator, FinalizeReport};
use crate::error::{Result, TelemetryError};
use crate::export::Exporter;
use crate::link::{Connector, LinkManager, RetryPolicy};
use crate::monitor::Monitor;
use crate::store::{SampleStore, StoreReader};
use crate::types::{AcquisitionState, AcquisitionStats};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Capacity of the optional acquisition event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 10_000;

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub address: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub acquisition: AcquisitionState,
    pub stats: AcquisitionStats,
    /// Link failure that ended the run, if any
    pub error: Option<String>,
    pub export: FinalizeReport,
}

impl RunSummary {
    /// Wall-clock length of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Builder for one acquisition run
pub struct Session {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
    events: bool,
}

impl Session {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            events: false,
        }
    }

    /// Flag that aborts open retries and the acquisition loop when raised
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish per-line events on a bounded channel
    pub fn with_events(mut self) -> Self {
        self.events = true;
        self
    }

    /// Open the link and start the acquisition thread
    ///
    /// Blocks while the link manager retries. Fails on invalid configuration,
    /// an exhausted retry budget, or a raised cancel flag.
    pub fn launch(self, connector: Box<dyn Connector>) -> Result<RunningSession> {
        self.config.validate()?;
        let link_config = &self.config.link;

        let (store_writer, reader) = SampleStore::open(&self.config.buffer)?;

        let policy = match link_config.max_open_attempts {
            Some(max) => RetryPolicy::bounded(link_config.retry_interval(), max),
            None => RetryPolicy::forever(link_config.retry_interval()),
        };
        let mut manager = LinkManager::new(connector, policy)
            .with_settle_delay(link_config.settle_delay())
            .with_cancel_flag(self.cancel.clone());

        let started_at = Utc::now();
        let link = manager.open(&link_config.port, link_config.baud_rate)?;
        let address = link.address().to_string();

        let exporter = self
            .config
            .export
            .enabled
            .then(|| Exporter::new(&self.config.export.path));
        let coordinator = Coordinator::new(link.writer()?, reader.clone(), exporter)
            .with_stop_grace(self.config.shutdown.stop_grace())
            .with_cancel_flag(self.cancel.clone());

        let mut acquisition =
            AcquisitionLoop::new(link, store_writer).with_cancel_flag(self.cancel.clone());
        let events = if self.events {
            let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
            acquisition = acquisition.with_event_sender(tx);
            Some(rx)
        } else {
            None
        };

        let thread_coordinator = coordinator.clone();
        let handle = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let report = acquisition.run();
                thread_coordinator.acquisition_stopped(report.state);
                report
            })
            .map_err(|e| TelemetryError::Worker(format!("failed to spawn acquisition thread: {}", e)))?;

        tracing::info!("Session running on {}", address);

        Ok(RunningSession {
            config: self.config,
            address,
            started_at,
            coordinator,
            reader,
            events,
            handle,
        })
    }
}

/// Handles to a launched run
pub struct RunningSession {
    config: AppConfig,
    address: String,
    started_at: DateTime<Utc>,
    coordinator: Coordinator,
    reader: StoreReader,
    events: Option<Receiver<AcquisitionEvent>>,
    handle: JoinHandle<AcquisitionReport>,
}

impl RunningSession {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn reader(&self) -> &StoreReader {
        &self.reader
    }

    /// Event receiver, if the session was built with events
    pub fn events(&self) -> Option<&Receiver<AcquisitionEvent>> {
        self.events.as_ref()
    }

    /// A live window consumer configured for this run
    pub fn monitor(&self) -> Monitor {
        Monitor::new(self.reader.clone(), &self.config.buffer, &self.config.monitor)
    }

    /// Join the acquisition thread and collect the run summary
    ///
    /// Finalization has always completed when this returns, even if the
    /// acquisition thread panicked.
    pub fn wait(self) -> Result<RunSummary> {
        let joined = self.handle.join();
        let export = self.coordinator.finalize();

        let report = joined.map_err(|_| TelemetryError::Worker("acquisition thread panicked".to_string()))?;

        Ok(RunSummary {
            address: self.address,
            started_at: self.started_at,
            finished_at: Utc::now(),
            acquisition: report.state,
            stats: report.stats,
            error: report.error,
            export,
        })
    }
}
