//! Configuration module for telemetry-rs
//!
//! This module handles the run configuration: which serial port to open and
//! how to retry it, the live window geometry, export destination, consumer
//! polling rate and shutdown policy.
//!
//! # Config Location
//!
//! When no explicit path is given, the configuration is read from the
//! platform-appropriate config directory:
//! - **Linux**: `~/.config/dev.hxyulin.telemetry-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.telemetry-rs/config.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.telemetry-rs\config.toml`
//!
//! # Example
//!
//! ```ignore
//! use telemetry_rs::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default("telemetry.toml");
//! config.link.port = "/dev/ttyACM0".to_string();
//! config.validate()?;
//! config.save("telemetry.toml")?;
//! ```

use crate::error::{Result, ResultExt, TelemetryError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.telemetry-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default serial bit rate used by the device firmware
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Default read timeout for the serial link in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default interval between open attempts in milliseconds
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// Default settle delay after a successful open in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;

/// Default live window span in device milliseconds
pub const DEFAULT_MAX_TIME_MS: u64 = 10_000;

/// Default decimation stride in device milliseconds
pub const DEFAULT_SAMPLE_STRIDE_MS: u64 = 50;

/// Default amount the display horizon advances by
pub const DEFAULT_HORIZON_STEP_MS: u64 = 20_000;

/// Default consumer poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default grace period for the device to honour the stop command
pub const DEFAULT_STOP_GRACE_MS: u64 = 2000;

/// Default export file
pub const DEFAULT_EXPORT_PATH: &str = "received_data.txt";

/// Get the path of the default config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== App Config ====================

/// Complete configuration for one acquisition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Serial link configuration
    #[serde(default)]
    pub link: LinkConfig,

    /// Sample store configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Export artifact configuration
    #[serde(default)]
    pub export: ExportConfig,

    /// Consumer loop configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Shutdown policy
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TelemetryError::Config(e.to_string()))
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TelemetryError::Serialization(e.to_string()))?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Check every section for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        self.buffer.validate()?;
        self.monitor.validate()?;
        Ok(())
    }
}

// ==================== Link Config ====================

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,

    /// Bit rate
    pub baud_rate: u32,

    /// Read timeout; bounds how long the acquisition loop waits between cancellation checks
    pub read_timeout_ms: u64,

    /// Fixed delay between open attempts
    pub retry_interval_ms: u64,

    /// Maximum open attempts (None = retry forever)
    pub max_open_attempts: Option<u32>,

    /// Delay after a successful open before stale input is discarded
    pub settle_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_open_attempts: None,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

impl LinkConfig {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Retry interval as a duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(TelemetryError::Config("link.port must not be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(TelemetryError::Config("link.baud_rate must be positive".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(TelemetryError::Config(
                "link.read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_open_attempts == Some(0) {
            return Err(TelemetryError::Config(
                "link.max_open_attempts must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Buffer Config ====================

/// Live window geometry
///
/// The window holds `max_time_ms / sample_stride_ms` samples, admitting only
/// samples whose timer is a multiple of the stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Span of device time the live window covers
    pub max_time_ms: u64,

    /// Decimation stride
    pub sample_stride_ms: u64,

    /// Amount the consumer's display horizon advances when crossed
    pub horizon_step_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_time_ms: DEFAULT_MAX_TIME_MS,
            sample_stride_ms: DEFAULT_SAMPLE_STRIDE_MS,
            horizon_step_ms: DEFAULT_HORIZON_STEP_MS,
        }
    }
}

impl BufferConfig {
    /// Number of samples the live window holds
    ///
    /// Returns 0 for a zero stride; call [`BufferConfig::validate`] first.
    pub fn capacity(&self) -> usize {
        self.max_time_ms
            .checked_div(self.sample_stride_ms)
            .map(|c| c as usize)
            .unwrap_or(0)
    }

    /// Fail fast on geometry that cannot describe a window
    pub fn validate(&self) -> Result<()> {
        if self.sample_stride_ms == 0 {
            return Err(TelemetryError::Config(
                "buffer.sample_stride_ms must be positive".to_string(),
            ));
        }
        if self.max_time_ms == 0 {
            return Err(TelemetryError::Config(
                "buffer.max_time_ms must be positive".to_string(),
            ));
        }
        if self.max_time_ms % self.sample_stride_ms != 0 {
            return Err(TelemetryError::Config(format!(
                "buffer.max_time_ms ({}) must be a multiple of buffer.sample_stride_ms ({})",
                self.max_time_ms, self.sample_stride_ms
            )));
        }
        if self.horizon_step_ms == 0 {
            return Err(TelemetryError::Config(
                "buffer.horizon_step_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Export Config ====================

/// Export artifact configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Whether finalization writes the export file
    pub enabled: bool,

    /// Target file, overwritten on each run
    pub path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_EXPORT_PATH),
        }
    }
}

// ==================== Monitor Config ====================

/// Consumer loop configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between window snapshots
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl MonitorConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TelemetryError::Config(
                "monitor.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Shutdown Config ====================

/// Shutdown policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for the device to end the stream after the stop command
    /// (None = wait for end-of-run or connection loss indefinitely)
    pub stop_grace_ms: Option<u64>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: Some(DEFAULT_STOP_GRACE_MS),
        }
    }
}

impl ShutdownConfig {
    /// Grace period as a duration
    pub fn stop_grace(&self) -> Option<Duration> {
        self.stop_grace_ms.map(Duration::from_millis)
    }
}

// ==================== Logging Config ====================

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// File that log output is also appended to (None = console only)
    pub file: Option<PathBuf>,

    /// Filter directive used when RUST_LOG is unset
    pub filter: Option<String>,
}

impl LoggingConfig {
    /// Split the log file into the directory and file name the appender opens
    ///
    /// A bare file name logs into the working directory.
    pub fn file_target(&self) -> Result<Option<(PathBuf, PathBuf)>> {
        let Some(path) = &self.file else {
            return Ok(None);
        };
        let name = path.file_name().ok_or_else(|| {
            TelemetryError::Config(format!("log file {} has no file name", path.display()))
        })?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Some((dir, PathBuf::from(name))))
    }
}

// ==================== Tests ====================
