//! Error types for the Grünbeck telemetry poller
//!
//! Every failure on the fetch path maps onto one of three recoverable
//! classes (empty response, transport, parse). None of them stop the poller;
//! the classification only drives logging severity and the availability
//! signal surfaced to the hosting layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for poller operations
pub type Result<T> = std::result::Result<T, GruenbeckError>;

/// Error types for device communication and poller operations
#[derive(Error, Debug)]
pub enum GruenbeckError {
    /// Connection errors (refused, reset, DNS)
    #[error("Connection error: {0}")]
    Connection(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Fetch exceeded its time ceiling
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Device answered with an empty body ("no data yet")
    #[error("Empty response from device")]
    EmptyResponse,

    /// Malformed markup in the device payload
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// A requested register was absent from the device payload
    #[error("Register {0} missing from device response")]
    MissingRegister(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found errors (registers, subscriptions)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Poller has been stopped
    #[error("Poller stopped")]
    Stopped,

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Information only
    Info,
    /// Warning condition, expected to self-resolve
    Warning,
    /// Error condition, may indicate a protocol or firmware mismatch
    Error,
}

/// Class of a failed fetch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Device returned no data
    EmptyResponse,
    /// Network, connection or timeout failure
    Transport,
    /// Malformed or incomplete payload
    Parse,
}

impl GruenbeckError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a parsing error
    pub fn parsing<S: Into<String>>(msg: S) -> Self {
        Self::Parsing(msg.into())
    }

    /// Create a missing register error
    pub fn missing_register<S: Into<String>>(register: S) -> Self {
        Self::MissingRegister(register.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Classify a fetch-path error
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GruenbeckError::EmptyResponse => FailureKind::EmptyResponse,
            GruenbeckError::Parsing(_) | GruenbeckError::MissingRegister(_) => FailureKind::Parse,
            _ => FailureKind::Transport,
        }
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GruenbeckError::EmptyResponse
            | GruenbeckError::Connection(_)
            | GruenbeckError::Timeout(_)
            | GruenbeckError::Http(_) => ErrorSeverity::Warning,
            GruenbeckError::Parsing(_) | GruenbeckError::MissingRegister(_) => ErrorSeverity::Error,
            GruenbeckError::Stopped => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Check if the next tick may succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GruenbeckError::Connection(_)
                | GruenbeckError::Timeout(_)
                | GruenbeckError::Http(_)
                | GruenbeckError::EmptyResponse
                | GruenbeckError::Parsing(_)
                | GruenbeckError::MissingRegister(_)
        )
    }
}
