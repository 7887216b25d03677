//! Error types
//!
//! Crate-wide error enum plus the per-subsystem errors it wraps.

use std::fmt;
use std::io;

use crate::catalog::CatalogError;
use crate::media::TranscoderError;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error (sockets, files)
    Io(io::Error),
    /// Transcoder process error
    Transcoder(TranscoderError),
    /// Camera catalog error
    Catalog(CatalogError),
    /// Session registry error
    Registry(RegistryError),
    /// Configuration could not be loaded or is invalid
    Config(String),
    /// Telemetry API error
    Telemetry(TelemetryError),
    /// Snapshot capture failed
    Capture(String),
    /// Scheduler is not running
    Scheduler(String),
    /// JSON (de)serialization error
    Json(serde_json::Error),
}

/// Errors talking to the telemetry API
#[derive(Debug)]
pub enum TelemetryError {
    /// Login was rejected or returned no token
    Auth(String),
    /// Request failed at the HTTP layer
    Http(reqwest::Error),
    /// Server answered with an unexpected status
    Status(u16),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Transcoder(e) => write!(f, "Transcoder error: {}", e),
            Error::Catalog(e) => write!(f, "Catalog error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Telemetry(e) => write!(f, "Telemetry error: {}", e),
            Error::Capture(msg) => write!(f, "Snapshot capture failed: {}", msg),
            Error::Scheduler(msg) => write!(f, "Scheduler error: {}", msg),
            Error::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            TelemetryError::Http(e) => write!(f, "request failed: {}", e),
            TelemetryError::Status(code) => write!(f, "unexpected status {}", code),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Transcoder(e) => Some(e),
            Error::Catalog(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Telemetry(TelemetryError::Http(e)) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for TelemetryError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<TranscoderError> for Error {
    fn from(e: TranscoderError) -> Self {
        Error::Transcoder(e)
    }
}

impl From<CatalogError> for Error {
    fn from(e: CatalogError) -> Self {
        Error::Catalog(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<TelemetryError> for Error {
    fn from(e: TelemetryError) -> Self {
        Error::Telemetry(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Telemetry(TelemetryError::Http(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
