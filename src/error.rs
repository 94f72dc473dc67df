//! Error handling for the telemetry pipeline
//!
//! This module defines the error taxonomy shared by the link, decoder,
//! store and export paths, plus a Result alias for use throughout the crate.
//!
//! Only [`TelemetryError::ConnectionLost`] ever stops an acquisition run.
//! Per-line failures ([`LineParseError`]) are absorbed by the acquisition loop,
//! and a failed open ([`TelemetryError::ConnectionUnavailable`]) only surfaces
//! when the retry policy has a finite attempt budget.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The link could not be opened within the retry budget
    #[error("Connection to {address} unavailable after {attempts} attempt(s)")]
    ConnectionUnavailable {
        address: String,
        attempts: u32,
        #[source]
        source: Option<std::io::Error>,
    },

    /// An established link failed on read or write
    #[error("Connection to {address} lost: {reason}")]
    ConnectionLost { address: String, reason: String },

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors writing the export artifact
    #[error("Export to {} failed: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A worker thread could not be spawned or panicked
    #[error("Worker thread failed: {0}")]
    Worker(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TelemetryError>,
    },
}

impl TelemetryError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TelemetryError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means an established link is gone
    pub fn is_connection_lost(&self) -> bool {
        match self {
            TelemetryError::ConnectionLost { .. } => true,
            TelemetryError::WithContext { source, .. } => source.is_connection_lost(),
            _ => false,
        }
    }
}

/// Reason a line was discarded by the frame decoder
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineParseError {
    /// The line is not valid UTF-8 text
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// The line has no field separator and is not the end-of-run marker
    #[error("no field separator and no end-of-run marker")]
    MissingSeparator,

    /// Wrong number of comma-separated fields
    #[error("expected 3 fields, found {found}")]
    FieldCount { found: usize },

    /// A float field failed to parse
    #[error("invalid {field} value {value:?}")]
    InvalidFloat { field: &'static str, value: String },

    /// The timer field failed to parse as a non-negative integer
    #[error("invalid timer value {value:?}")]
    InvalidInteger { value: String },

    /// A float field parsed to NaN or infinity
    #[error("{field} is not finite")]
    NonFinite { field: &'static str },
}

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TelemetryError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| TelemetryError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("stride must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: stride must be positive"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = TelemetryError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load");
        assert!(with_ctx.to_string().contains("Failed to load"));
    }

    #[test]
    fn test_connection_lost_through_context() {
        let err = TelemetryError::ConnectionLost {
            address: "/dev/ttyUSB0".to_string(),
            reason: "device unplugged".to_string(),
        };
        assert!(err.is_connection_lost());
        assert!(err.with_context("reading line").is_connection_lost());

        let other = TelemetryError::Config("x".to_string());
        assert!(!other.is_connection_lost());
    }

    #[test]
    fn test_parse_error_display() {
        let err = LineParseError::FieldCount { found: 2 };
        assert_eq!(err.to_string(), "expected 3 fields, found 2");

        let err = LineParseError::InvalidFloat {
            field: "angle",
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("angle"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_io_result_context() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        let err = result.context("Failed to read config.toml").unwrap_err();

        assert_eq!(err.to_string(), "Failed to read config.toml: IO error: no such file");
        assert!(matches!(
            err,
            TelemetryError::WithContext { ref source, .. } if matches!(**source, TelemetryError::Io(_))
        ));
    }

    #[test]
    fn test_result_with_context_is_lazy() {
        let ok: Result<u32> = Ok(7);
        let value = ok.with_context(|| panic!("context built for a success")).unwrap();
        assert_eq!(value, 7);

        let failed: Result<u32> = Err(TelemetryError::Config("bad".to_string()));
        let err = failed.with_context(|| "Loading run".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Loading run: Configuration error: bad");
    }
}
