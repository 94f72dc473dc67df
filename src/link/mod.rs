//! Link manager for the device connection
//!
//! This module owns the physical connection to the device. Opening retries at
//! a fixed interval (forever by default, since the device may simply not be
//! powered yet); once open, any read or write failure marks the link
//! [`LinkState::Lost`] and is reported as [`TelemetryError::ConnectionLost`],
//! which is never retried.
//!
//! # Components
//!
//! - [`Connector`] / [`Transport`] / [`CommandSink`] - the seam between the
//!   manager and a concrete transport
//! - [`SerialConnector`] - `serialport`-backed transport for real hardware
//! - [`ScriptedDevice`] - in-memory device for tests and simulation
//! - [`LinkManager`] - retrying open with settle delay and stale-input flush
//! - [`Link`] / [`LinkWriter`] - read half and command half of an open link
//!
//! # Example
//!
//! ```ignore
//! let mut manager = LinkManager::new(
//!     Box::new(SerialConnector::new(config.read_timeout())),
//!     RetryPolicy::forever(config.retry_interval()),
//! );
//! let mut link = manager.open(&config.port, config.baud_rate)?;
//! let mut writer = link.writer()?;
//!
//! writer.write(b"s")?;
//! while let ReadStatus::Line(bytes) = link.read_line()? {
//!     // decode
//! }
//! link.close();
//! ```

pub mod mock;
pub mod serial;

pub use mock::{ScriptStep, ScriptedConnector, ScriptedDevice};
pub use serial::{SerialConnector, SerialTransport};

use crate::error::{Result, TelemetryError};
use crate::types::LinkState;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Result of one transport read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// A complete line, including its terminator
    Line(Vec<u8>),
    /// The read timed out before a full line arrived; partial bytes are kept
    Pending,
}

/// Opens transports to a device address
pub trait Connector: Send {
    /// Open the device at `address` with the given bit rate
    fn open(&mut self, address: &str, baud_rate: u32) -> io::Result<Box<dyn Transport>>;
}

/// Byte-oriented line transport
///
/// Implementations must deliver whole lines: bytes received before a read
/// timeout are buffered until the terminator arrives.
pub trait Transport: Send {
    /// Read the next complete line
    fn read_line(&mut self) -> io::Result<ReadStatus>;

    /// Drop any input received so far
    fn discard_input(&mut self) -> io::Result<()>;

    /// Get an independent handle for sending commands while another thread reads
    fn command_sink(&self) -> io::Result<Box<dyn CommandSink>>;
}

/// Write-only handle to a transport
pub trait CommandSink: Send {
    /// Send raw command bytes
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// How the manager retries a failed open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Attempt budget (None = unbounded)
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever at a fixed interval
    pub fn forever(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Retry at most `max_attempts` times
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether this policy never gives up
    pub fn is_infinite(&self) -> bool {
        self.max_attempts.is_none()
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Link state shared between the read half, the command half and observers
#[derive(Debug, Clone, Default)]
pub struct SharedLinkState(Arc<Mutex<LinkState>>);

impl SharedLinkState {
    /// Current state
    pub fn get(&self) -> LinkState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: LinkState) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::debug!("Link state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Mark lost unless already closed deliberately
    fn mark_lost(&self) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == LinkState::Open {
            *current = LinkState::Lost;
        }
    }

    /// Mark closed if currently open
    fn mark_closed(&self) {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*current, LinkState::Open | LinkState::Connecting) {
            *current = LinkState::Closed;
        }
    }
}

/// Opens links with bounded-interval retry
pub struct LinkManager {
    connector: Box<dyn Connector>,
    policy: RetryPolicy,
    settle_delay: Duration,
    state: SharedLinkState,
    cancel: Option<Arc<AtomicBool>>,
}

impl LinkManager {
    /// Create a new link manager
    pub fn new(connector: Box<dyn Connector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            settle_delay: Duration::ZERO,
            state: SharedLinkState::default(),
            cancel: None,
        }
    }

    /// Set the delay between a successful open and the input flush
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Abort retrying when this flag becomes true
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Get the retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Get a handle to the link state
    pub fn state(&self) -> SharedLinkState {
        self.state.clone()
    }

    /// Open the device, retrying on failure according to the policy
    ///
    /// With an unbounded policy this only returns once the device is open
    /// (or the cancel flag is raised).
    pub fn open(&mut self, address: &str, baud_rate: u32) -> Result<Link> {
        let mut attempts = 0u32;
        self.state.set(LinkState::Connecting);

        loop {
            attempts += 1;
            let error = match self.connector.open(address, baud_rate) {
                Ok(transport) => return Ok(self.establish(address, transport, attempts)),
                Err(e) => e,
            };

            tracing::warn!(
                "Waiting for {} @ {} baud (attempt {}): {}",
                address,
                baud_rate,
                attempts,
                error
            );

            if self.policy.exhausted(attempts) || self.is_cancelled() {
                self.state.set(LinkState::Closed);
                return Err(TelemetryError::ConnectionUnavailable {
                    address: address.to_string(),
                    attempts,
                    source: Some(error),
                });
            }

            std::thread::sleep(self.policy.interval);
        }
    }

    fn establish(&self, address: &str, mut transport: Box<dyn Transport>, attempts: u32) -> Link {
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        if let Err(e) = transport.discard_input() {
            tracing::warn!("Failed to discard stale input on {}: {}", address, e);
        }

        self.state.set(LinkState::Open);
        tracing::info!("Link to {} open after {} attempt(s)", address, attempts);

        Link {
            address: address.to_string(),
            transport: Some(transport),
            state: self.state.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Read half of an open link
pub struct Link {
    address: String,
    transport: Option<Box<dyn Transport>>,
    state: SharedLinkState,
}

impl Link {
    /// Device address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    /// Handle to the shared link state
    pub fn shared_state(&self) -> SharedLinkState {
        self.state.clone()
    }

    /// Read the next line
    pub fn read_line(&mut self) -> Result<ReadStatus> {
        let transport = self.usable_transport()?;
        match transport.read_line() {
            Ok(status) => Ok(status),
            Err(e) => Err(self.lost(e)),
        }
    }

    /// Get a command half that can write while this half reads
    pub fn writer(&self) -> Result<LinkWriter> {
        let transport = self.transport.as_ref().ok_or_else(|| self.closed_error())?;
        let sink = transport.command_sink().map_err(|e| TelemetryError::ConnectionLost {
            address: self.address.clone(),
            reason: format!("failed to open command handle: {}", e),
        })?;
        Ok(LinkWriter {
            address: self.address.clone(),
            sink: Some(sink),
            state: self.state.clone(),
        })
    }

    /// Release the transport; closing twice is a no-op
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            self.state.mark_closed();
            tracing::info!("Link to {} closed", self.address);
        }
    }

    /// Whether the transport has been released
    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    fn usable_transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        if self.state.get() != LinkState::Open {
            return Err(self.closed_error());
        }
        let error = self.closed_error();
        self.transport.as_mut().ok_or(error)
    }

    fn lost(&self, error: io::Error) -> TelemetryError {
        self.state.mark_lost();
        tracing::error!("Link to {} lost: {}", self.address, error);
        TelemetryError::ConnectionLost {
            address: self.address.clone(),
            reason: error.to_string(),
        }
    }

    fn closed_error(&self) -> TelemetryError {
        TelemetryError::ConnectionLost {
            address: self.address.clone(),
            reason: format!("link is {}", self.state.get()),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Command half of an open link
pub struct LinkWriter {
    address: String,
    sink: Option<Box<dyn CommandSink>>,
    state: SharedLinkState,
}

impl LinkWriter {
    /// Send command bytes to the device
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state.get() != LinkState::Open {
            return Err(TelemetryError::ConnectionLost {
                address: self.address.clone(),
                reason: format!("link is {}", self.state.get()),
            });
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(TelemetryError::ConnectionLost {
                address: self.address.clone(),
                reason: "command handle released".to_string(),
            });
        };

        sink.send(bytes).map_err(|e| {
            self.state.mark_lost();
            tracing::error!("Command write to {} failed: {}", self.address, e);
            TelemetryError::ConnectionLost {
                address: self.address.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Device address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Release the command handle; releasing twice is a no-op
    pub fn close(&mut self) {
        if self.sink.take().is_some() {
            tracing::debug!("Command handle for {} released", self.address);
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state.get()
    }
}
