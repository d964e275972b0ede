//! Error handling for the deimos probe engine
//!
//! Only two classes of failure actually abort a scan: configuration errors
//! caught before the first probe, and fatal transport errors. Probe loss and
//! host timeouts are normal operating conditions and never surface here.

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Empty probe plan")]
    EmptyPlan,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ScanError>;
