//! Core request data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority given to requesters that never had one assigned.
pub const DEFAULT_PRIORITY: i32 = 0;

/// A unit of work: one payload to fetch and relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Unique identifier (UUID).
    pub id: String,
    /// Content locator (magnet URI or similar), immutable once set.
    pub locator: String,
    /// Payload name, known after metadata resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Payload size in bytes, known after metadata resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// When the request was created. Primary ordering key.
    pub created_at: DateTime<Utc>,
    /// When a controller claimed the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the download phase began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the request reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Last reported download progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_completed: Option<u64>,
    /// Failure cause of the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Reference returned by the distribution target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_ref: Option<String>,
}

impl Request {
    /// Derive the user-visible status from the life-cycle fields.
    pub fn status(&self) -> RequestStatus {
        if self.delivery_ref.is_some() {
            RequestStatus::Delivered
        } else if self.finished_at.is_some() {
            RequestStatus::Failed
        } else if self.started_at.is_some() {
            RequestStatus::Downloading
        } else if self.claimed_at.is_some() {
            RequestStatus::Claimed
        } else {
            RequestStatus::Queued
        }
    }

    /// Whether the request reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Download progress in percent, if size and progress are known.
    pub fn progress_pct(&self) -> Option<f64> {
        match (self.size_bytes, self.bytes_completed) {
            (Some(0), Some(_)) => Some(100.0),
            (Some(total), Some(done)) => Some((done as f64 / total as f64 * 100.0).min(100.0)),
            _ => None,
        }
    }
}

/// User-visible status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed, metadata being resolved.
    Claimed,
    /// Payload is downloading or being relayed.
    Downloading,
    /// Relayed to the distribution target.
    Delivered,
    /// Attempt failed; see `last_error`.
    Failed,
}

impl RequestStatus {
    /// Returns the string representation for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Claimed => "claimed",
            RequestStatus::Downloading => "downloading",
            RequestStatus::Delivered => "delivered",
            RequestStatus::Failed => "failed",
        }
    }
}

/// Actor on whose behalf a request exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    /// Higher is served first among requests created at the same instant.
    pub priority: i32,
}

/// Per-requester delivery bookkeeping for a shared request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub request_id: String,
    pub requester_id: String,
    /// Whether the requester has been notified of completion.
    pub delivered: bool,
}
