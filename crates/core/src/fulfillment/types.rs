//! Types for the fulfillment pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::loader::LoaderError;
use crate::relay::{DeliveryRef, RelayError};
use crate::request::StoreError;

/// Result of an attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing to do this tick. No state was written.
    NoEligibleRequest,
    /// The payload was relayed and the delivery recorded.
    Delivered {
        request_id: String,
        delivery_ref: DeliveryRef,
    },
}

/// Errors that end an attempt.
///
/// Everything except [`AttemptError::StatusWrite`] has been recorded against
/// the request (`last_error` + `finished_at`) before it is returned. The
/// `Display` text is what gets stored. A `StatusWrite` for an unrecorded
/// preflight is still followed by a best-effort failure record.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("metadata resolution failed: {source}")]
    MetadataResolutionFailed {
        request_id: String,
        #[source]
        source: LoaderError,
    },

    #[error("payload too large: {size_bytes} bytes (limit {max_bytes} bytes)")]
    PayloadTooLarge {
        request_id: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("download timed out after {timeout:?}")]
    DownloadTimeout {
        request_id: String,
        timeout: Duration,
    },

    #[error("download failed: {source}")]
    DownloadFailed {
        request_id: String,
        #[source]
        source: LoaderError,
    },

    #[error("attempt cancelled")]
    Cancelled { request_id: String },

    #[error("delivery failed: {source}")]
    DeliveryFailed {
        request_id: String,
        #[source]
        source: RelayError,
    },

    /// A status write failed; the request state no longer reflects reality.
    #[error("status write failed{}: {source}", .cause.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    StatusWrite {
        request_id: Option<String>,
        #[source]
        source: StoreError,
        /// The outcome that could not be recorded.
        cause: Option<String>,
    },
}

impl AttemptError {
    /// The request this attempt was working on, if one had been claimed.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            AttemptError::MetadataResolutionFailed { request_id, .. }
            | AttemptError::PayloadTooLarge { request_id, .. }
            | AttemptError::DownloadTimeout { request_id, .. }
            | AttemptError::DownloadFailed { request_id, .. }
            | AttemptError::Cancelled { request_id }
            | AttemptError::DeliveryFailed { request_id, .. } => Some(request_id),
            AttemptError::StatusWrite { request_id, .. } => request_id.as_deref(),
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::MetadataResolutionFailed { .. } => "metadata_resolution_failed",
            AttemptError::PayloadTooLarge { .. } => "payload_too_large",
            AttemptError::DownloadTimeout { .. } => "download_timeout",
            AttemptError::DownloadFailed { .. } => "download_failed",
            AttemptError::Cancelled { .. } => "cancelled",
            AttemptError::DeliveryFailed { .. } => "delivery_failed",
            AttemptError::StatusWrite { .. } => "status_write",
        }
    }
}

/// Invoked whenever an attempt ends with a status write that could not be persisted.
pub type StatusAlertCallback = Arc<dyn Fn(&AttemptError) + Send + Sync>;

/// Life-cycle state of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Snapshot of the scheduler for the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Attempts currently running.
    pub in_flight: usize,
    /// Concurrency bound (0 = unlimited).
    pub max_concurrent_attempts: usize,
    pub scan_interval_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_is_recordable() {
        let err = AttemptError::PayloadTooLarge {
            request_id: "r1".to_string(),
            size_bytes: 500_000_000,
            max_bytes: 100_000_000,
        };
        assert_eq!(
            err.to_string(),
            "payload too large: 500000000 bytes (limit 100000000 bytes)"
        );
        assert_eq!(err.kind(), "payload_too_large");
        assert_eq!(err.request_id(), Some("r1"));
    }

    #[test]
    fn test_status_write_display() {
        let err = AttemptError::StatusWrite {
            request_id: Some("r1".to_string()),
            source: StoreError::Database("disk I/O error".to_string()),
            cause: Some("attempt cancelled".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "status write failed (attempt cancelled): database error: disk I/O error"
        );

        let err = AttemptError::StatusWrite {
            request_id: None,
            source: StoreError::Database("locked".to_string()),
            cause: None,
        };
        assert_eq!(err.to_string(), "status write failed: database error: locked");
        assert_eq!(err.request_id(), None);
    }

    #[test]
    fn test_delivery_failed_includes_transport_text() {
        let err = AttemptError::DeliveryFailed {
            request_id: "r1".to_string(),
            source: RelayError::Transport("connection reset by peer".to_string()),
        };
        assert!(err.to_string().contains("connection reset by peer"));
    }

    #[test]
    fn test_scheduler_state_serialization() {
        assert_eq!(
            serde_json::to_string(&SchedulerState::Running).unwrap(),
            "\"running\""
        );
    }
}
