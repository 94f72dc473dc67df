//! # telemetry-rs: Serial Telemetry Acquisition
//!
//! Ingests a line-oriented telemetry stream from a device over a serial
//! link. Each record carries an angle, a PWM duty cycle and a device-side
//! millisecond timer. Every decoded sample is kept in an append-only history;
//! a decimated, bounded live window of the same samples is available for
//! display while the run is in progress. On shutdown the full history is
//! exported to a text file.
//!
//! ## Architecture
//!
//! - **Link**: Opens the serial port with retry and a settle/flush step ([`link`])
//! - **Decoder**: Turns one raw line into a sample, end-of-run, or failure ([`decoder`])
//! - **Store**: Single-writer history plus live window behind one lock ([`store`])
//! - **Acquisition**: The reading thread and its state machine ([`acquisition`])
//! - **Coordinator**: Start/stop commands and exactly-once finalization ([`coordinator`])
//! - **Monitor**: Periodic consumer of the live window ([`monitor`])
//! - **Communication**: Crossbeam channels for events and the shutdown signal
//!
//! ## Configuration
//!
//! Settings are stored as TOML in the platform config directory under
//! `dev.hxyulin.telemetry-rs`:
//!
//! - **Linux**: `~/.config/dev.hxyulin.telemetry-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.telemetry-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.telemetry-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use telemetry_rs::{AppConfig, SerialConnector, Session};
//!
//! fn main() -> telemetry_rs::Result<()> {
//!     let config = AppConfig::default();
//!     let connector = SerialConnector::new(config.link.read_timeout());
//!     let running = Session::new(config).launch(Box::new(connector))?;
//!
//!     running.coordinator().start()?;
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     running.coordinator().request_shutdown();
//!
//!     let summary = running.wait()?;
//!     println!("{} samples exported", summary.export.exported);
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod export;
pub mod link;
pub mod monitor;
pub mod session;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use acquisition::{AcquisitionEvent, AcquisitionLoop, AcquisitionReport};
pub use config::AppConfig;
pub use coordinator::{Coordinator, FinalizeReport, ShutdownSignal};
pub use decoder::LineOutcome;
pub use error::{LineParseError, Result, TelemetryError};
pub use export::Exporter;
pub use link::{Connector, LinkManager, RetryPolicy, ScriptedDevice, SerialConnector};
pub use monitor::{LiveFrame, Monitor};
pub use session::{RunSummary, RunningSession, Session};
pub use store::{SampleStore, StoreReader, StoreWriter, WindowSnapshot};
pub use types::{AcquisitionState, AcquisitionStats, LinkState, RunLifecycle, Sample};
