//! Error types for ironsight-engine
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::ingest::PacketError;

/// Main error type for ironsight-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors bubbled up from the shared library
    #[error(transparent)]
    Common(#[from] ironsight_common::Error),

    /// File or socket I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Rejected ingress datagram
    #[error("Packet rejected: {0}")]
    Packet(#[from] PacketError),

    /// Calibration collection or fit failure
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Operation not valid in the current mode/session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Pipeline task gone or other internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using ironsight-engine Error
pub type Result<T> = std::result::Result<T, Error>;
