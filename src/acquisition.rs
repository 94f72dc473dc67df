//! Acquisition loop
//!
//! This module contains the loop that runs on its own thread, reads lines from
//! the link, decodes them and appends the samples to the store.
//!
//! # State machine
//!
//! ```text
//! Idle -> Reading -> { Reading, StoppedClean, StoppedLost, StoppedCancelled }
//! ```
//!
//! - A malformed line is logged and skipped; the loop stays in `Reading`
//! - The end-of-run marker moves it to `StoppedClean`
//! - A read failure on the established link moves it to `StoppedLost`
//! - A raised cancel flag, or a store sealed for finalization, moves it to
//!   `StoppedCancelled`
//!
//! Once stopped the loop performs no further reads and closes the link.
//!
//! # Events
//!
//! Consumers that want per-sample notifications can attach a channel with
//! [`AcquisitionLoop::with_event_sender`]. Events are sent with `try_send`, so
//! a full channel drops events (counted in [`AcquisitionStats::dropped_events`])
//! instead of stalling ingestion.

use crate::decoder::{self, LineOutcome};
use crate::error::{LineParseError, TelemetryError};
use crate::link::{Link, ReadStatus};
use crate::store::{AppendOutcome, StoreWriter};
use crate::types::{AcquisitionState, AcquisitionStats, Sample};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Notification published by the acquisition loop
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// A sample was stored
    Sample(Sample),
    /// A line was discarded
    ParseFailure {
        /// The offending line (lossy UTF-8, terminator stripped)
        line: String,
        /// Why it was discarded
        reason: LineParseError,
    },
    /// The loop reached a terminal state
    Stopped(AcquisitionState),
}

/// Summary returned when the loop stops
#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    /// Terminal state
    pub state: AcquisitionState,
    /// Counters at the time of stopping
    pub stats: AcquisitionStats,
    /// Link failure that ended the run, if any
    pub error: Option<String>,
}

/// What one iteration decided
enum Step {
    Continue,
    Stop(AcquisitionState),
}

/// The loop that drives the link and decoder and feeds the store
pub struct AcquisitionLoop {
    link: Link,
    writer: StoreWriter,
    state: AcquisitionState,
    stats: AcquisitionStats,
    cancel: Arc<AtomicBool>,
    events: Option<Sender<AcquisitionEvent>>,
    last_timer: Option<u64>,
    error: Option<String>,
}

impl AcquisitionLoop {
    /// Create a loop over an open link and the store's writer
    pub fn new(link: Link, writer: StoreWriter) -> Self {
        Self {
            link,
            writer,
            state: AcquisitionState::Idle,
            stats: AcquisitionStats::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            events: None,
            last_timer: None,
            error: None,
        }
    }

    /// Stop at the next read boundary once this flag becomes true
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish events on this channel
    pub fn with_event_sender(mut self, events: Sender<AcquisitionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current state
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Current counters
    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    /// Run until a terminal state is reached, then release the link
    pub fn run(mut self) -> AcquisitionReport {
        self.state = AcquisitionState::Reading;
        tracing::info!("Acquisition started on {}", self.link.address());

        let final_state = loop {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!("Acquisition cancelled before the device ended the run");
                break AcquisitionState::StoppedCancelled;
            }
            match self.step() {
                Step::Continue => {}
                Step::Stop(state) => break state,
            }
        };

        self.state = final_state;
        self.link.close();
        self.publish(AcquisitionEvent::Stopped(final_state));

        tracing::info!(
            "Acquisition {}: {} sample(s), {} parse failure(s), {} ignored line(s)",
            final_state,
            self.stats.samples,
            self.stats.parse_failures,
            self.stats.ignored_lines
        );

        AcquisitionReport {
            state: final_state,
            stats: self.stats,
            error: self.error,
        }
    }

    /// Read and handle one line
    fn step(&mut self) -> Step {
        let bytes = match self.link.read_line() {
            Ok(ReadStatus::Line(bytes)) => bytes,
            Ok(ReadStatus::Pending) => return Step::Continue,
            Err(e) => return self.on_link_error(e),
        };

        self.stats.lines_read += 1;
        match decoder::decode(&bytes) {
            LineOutcome::Sample(sample) => self.on_sample(sample),
            LineOutcome::EndOfRun => {
                tracing::info!("Device reported end of run");
                Step::Stop(AcquisitionState::StoppedClean)
            }
            LineOutcome::ParseFailure(reason) => {
                self.on_parse_failure(&bytes, reason);
                Step::Continue
            }
        }
    }

    fn on_sample(&mut self, sample: Sample) -> Step {
        if self.writer.append(sample) == AppendOutcome::Sealed {
            tracing::warn!(
                "Store sealed for finalization; dropping sample at {} ms and stopping",
                sample.timer
            );
            return Step::Stop(AcquisitionState::StoppedCancelled);
        }

        if let Some(last) = self.last_timer {
            if sample.timer < last {
                self.stats.timer_regressions += 1;
                tracing::warn!("Device timer went backwards: {} ms after {} ms", sample.timer, last);
            }
        }
        self.last_timer = Some(sample.timer);
        self.stats.samples += 1;
        tracing::trace!("Sample {:?}", sample);
        self.publish(AcquisitionEvent::Sample(sample));
        Step::Continue
    }

    fn on_parse_failure(&mut self, bytes: &[u8], reason: LineParseError) {
        let line = String::from_utf8_lossy(bytes)
            .trim_end_matches(['\n', '\r'])
            .to_string();

        if reason == LineParseError::MissingSeparator {
            self.stats.ignored_lines += 1;
            tracing::debug!("Ignoring line {:?}", line);
        } else {
            self.stats.parse_failures += 1;
            tracing::debug!("Discarding line {:?}: {}", line, reason);
        }
        self.publish(AcquisitionEvent::ParseFailure { line, reason });
    }

    fn on_link_error(&mut self, error: TelemetryError) -> Step {
        tracing::error!("Acquisition stopping: {}", error);
        self.error = Some(error.to_string());
        Step::Stop(AcquisitionState::StoppedLost)
    }

    fn publish(&mut self, event: AcquisitionEvent) {
        if let Some(events) = &self.events {
            if events.try_send(event).is_err() {
                self.stats.dropped_events += 1;
            }
        }
    }
}
