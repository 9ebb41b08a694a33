//! Types for relaying payloads to a distribution target.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during delivery.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("distribution API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("delivery timed out")]
    Timeout,
}

/// Durable reference to a delivered artifact (message id for chat targets).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryRef(String);

impl DeliveryRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pushes completed files to an external distribution target.
#[async_trait]
pub trait RelayUploader: Send + Sync {
    /// Uploader name for logging.
    fn name(&self) -> &str;

    /// Deliver a local file to `target`, returning a reference to the delivery.
    async fn deliver(&self, path: &Path, target: &str) -> Result<DeliveryRef, RelayError>;
}
