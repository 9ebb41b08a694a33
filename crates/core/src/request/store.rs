//! Request storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{DeliveryRecord, Request, Requester};

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Request not found.
    #[error("request not found: {0}")]
    NotFound(String),

    /// Requester not found.
    #[error("requester not found: {0}")]
    RequesterNotFound(String),

    /// The request already carries a delivery reference and is immutable.
    #[error("request {0} is already delivered")]
    AlreadyDelivered(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Intake of a new request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Content locator.
    pub locator: String,
    /// Requester to link; created with default priority if unknown.
    pub requester_id: String,
    /// Creation time override (defaults to now).
    pub created_at: Option<DateTime<Utc>>,
}

impl NewRequest {
    pub fn new(locator: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            requester_id: requester_id.into(),
            created_at: None,
        }
    }

    /// Stamp the request with an explicit creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Durable status store for requests.
///
/// The fulfillment controller only uses `next_eligible_request` and the
/// write operations below it; the rest serve intake and fan-out.
/// Every write is idempotent when repeated with the same arguments.
pub trait RequestStore: Send + Sync {
    /// Create a request, or link the requester to the existing request with
    /// the same locator.
    fn create_request(&self, request: NewRequest) -> Result<Request, StoreError>;

    /// Get a request by ID.
    fn get(&self, id: &str) -> Result<Option<Request>, StoreError>;

    /// All requests linked to a requester, oldest first.
    fn list_for_requester(&self, requester_id: &str) -> Result<Vec<Request>, StoreError>;

    /// Create or update a requester's priority.
    fn upsert_requester(&self, id: &str, priority: i32) -> Result<Requester, StoreError>;

    /// Get a requester by ID.
    fn get_requester(&self, id: &str) -> Result<Option<Requester>, StoreError>;

    /// Atomically claim the next eligible request.
    ///
    /// Ordered by ascending creation time, then descending requester priority.
    /// The returned request is marked claimed, so concurrent callers never
    /// receive the same request.
    fn next_eligible_request(&self) -> Result<Option<Request>, StoreError>;

    /// Persist resolved metadata and mark the download as started.
    fn update_preflight(
        &self,
        id: &str,
        name: &str,
        size_bytes: u64,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record advisory download progress.
    fn record_progress(&self, id: &str, bytes_completed: u64) -> Result<(), StoreError>;

    /// Persist a successful delivery.
    fn update_postflight(
        &self,
        id: &str,
        delivery_ref: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Persist a terminal failure.
    fn record_failure(
        &self,
        id: &str,
        error_text: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Requesters of a request that have not been notified yet.
    fn undelivered_requesters(&self, request_id: &str) -> Result<Vec<Requester>, StoreError>;

    /// Mark a requester as notified of a request's completion.
    fn mark_delivered(&self, request_id: &str, requester_id: &str) -> Result<(), StoreError>;

    /// Delivery bookkeeping of every requester linked to a request.
    fn delivery_records(&self, request_id: &str) -> Result<Vec<DeliveryRecord>, StoreError>;
}
