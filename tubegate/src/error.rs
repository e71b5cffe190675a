//! Application-wide error types.

use std::path::{Path, PathBuf};

use media_extractor::ExtractionError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request or a source URL the extractor does not accept.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("No viable format: {0}")]
    NoViableFormat(String),

    /// I/O or process failure after delivery started.
    #[error("Delivery failed: {reason}")]
    DeliveryFailure {
        reason: String,
        /// Partially written file, for disk targets.
        path: Option<PathBuf>,
    },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn no_viable_format(msg: impl Into<String>) -> Self {
        Self::NoViableFormat(msg.into())
    }

    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::DeliveryFailure {
            reason: reason.into(),
            path: None,
        }
    }

    pub fn delivery_at(reason: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::DeliveryFailure {
            reason: reason.into(),
            path: Some(path.into()),
        }
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}
