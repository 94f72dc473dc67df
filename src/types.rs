//! Core data types for the telemetry pipeline
//!
//! This module contains the fundamental data structures used throughout
//! the crate: decoded samples and the state enums that the link manager,
//! acquisition loop and coordinator expose.

use serde::{Deserialize, Serialize};

/// One decoded telemetry triple reported by the device
///
/// `timer` is the device-side clock in milliseconds and is expected to be
/// non-decreasing across a run. Samples are immutable once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Measured angle in degrees
    pub angle: f64,
    /// Applied PWM duty cycle in percent
    pub duty: f64,
    /// Device timestamp in milliseconds
    pub timer: u64,
}

impl Sample {
    /// Create a new sample
    pub fn new(angle: f64, duty: f64, timer: u64) -> Self {
        Self { angle, duty, timer }
    }

    /// Whether this sample lands on the live window's decimation grid
    pub fn is_on_stride(&self, stride_ms: u64) -> bool {
        stride_ms != 0 && self.timer % stride_ms == 0
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Angle: {:.4}, Duty_cycle: {:.4}%, Timer: {}ms",
            self.angle, self.duty, self.timer
        )
    }
}

/// Connection state of the device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    /// Open is being attempted (possibly retrying)
    #[default]
    Connecting,
    /// Link is open and usable
    Open,
    /// Link was closed deliberately
    Closed,
    /// An established link failed on read or write
    Lost,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Connecting => write!(f, "Connecting..."),
            LinkState::Open => write!(f, "Open"),
            LinkState::Closed => write!(f, "Closed"),
            LinkState::Lost => write!(f, "Lost"),
        }
    }
}

/// Lifecycle of one acquisition run, owned by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunLifecycle {
    /// Link open, start command not yet sent
    #[default]
    Idle,
    /// Start command sent, samples flowing
    Running,
    /// Export and resource release in progress
    Finalizing,
    /// Finalization complete
    Terminated,
}

impl RunLifecycle {
    /// Whether finalization has begun or completed
    pub fn is_final(&self) -> bool {
        matches!(self, RunLifecycle::Finalizing | RunLifecycle::Terminated)
    }
}

impl std::fmt::Display for RunLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunLifecycle::Idle => write!(f, "Idle"),
            RunLifecycle::Running => write!(f, "Running"),
            RunLifecycle::Finalizing => write!(f, "Finalizing"),
            RunLifecycle::Terminated => write!(f, "Terminated"),
        }
    }
}

/// State of the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// Not yet reading
    #[default]
    Idle,
    /// Reading lines from the link
    Reading,
    /// The device sent its end-of-run marker
    StoppedClean,
    /// The link failed after it was established
    StoppedLost,
    /// Shutdown was requested and the device never ended the stream
    StoppedCancelled,
}

impl AcquisitionState {
    /// Whether the loop has reached a terminal state
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            AcquisitionState::StoppedClean
                | AcquisitionState::StoppedLost
                | AcquisitionState::StoppedCancelled
        )
    }
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "Idle"),
            AcquisitionState::Reading => write!(f, "Reading"),
            AcquisitionState::StoppedClean => write!(f, "Stopped (end of run)"),
            AcquisitionState::StoppedLost => write!(f, "Stopped (connection lost)"),
            AcquisitionState::StoppedCancelled => write!(f, "Stopped (cancelled)"),
        }
    }
}

/// Counters kept by the acquisition loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionStats {
    /// Complete lines received from the link
    pub lines_read: u64,
    /// Lines decoded into samples
    pub samples: u64,
    /// Candidate sample lines that failed to parse
    pub parse_failures: u64,
    /// Lines without a separator that were not the end-of-run marker
    pub ignored_lines: u64,
    /// Samples whose timer went backwards relative to the previous one
    pub timer_regressions: u64,
    /// Events dropped because the event channel was full
    pub dropped_events: u64,
}

impl AcquisitionStats {
    /// Percentage of received lines that produced a sample
    pub fn yield_rate(&self) -> f64 {
        if self.lines_read == 0 {
            100.0
        } else {
            (self.samples as f64 / self.lines_read as f64) * 100.0
        }
    }
}
