//! Request store wrapper that injects write failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use crate::request::{
    DeliveryRecord, NewRequest, Request, RequestStore, Requester, SqliteRequestStore, StoreError,
};

/// In-memory SQLite store whose status writes and claims can be made to fail.
pub struct FlakyRequestStore {
    inner: SqliteRequestStore,
    fail_writes: AtomicBool,
    fail_claims: AtomicBool,
    fail_progress: AtomicBool,
    preflight_failures: AtomicUsize,
    failed_writes: AtomicUsize,
}

impl Default for FlakyRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyRequestStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteRequestStore::in_memory().expect("in-memory store"),
            fail_writes: AtomicBool::new(false),
            fail_claims: AtomicBool::new(false),
            fail_progress: AtomicBool::new(false),
            preflight_failures: AtomicUsize::new(0),
            failed_writes: AtomicUsize::new(0),
        }
    }

    /// The wrapped store, for seeding and inspecting state.
    pub fn inner(&self) -> &SqliteRequestStore {
        &self.inner
    }

    /// Fail preflight, progress, postflight and failure writes.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail `next_eligible_request`.
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    /// Fail `record_progress` only.
    pub fn fail_progress(&self, fail: bool) {
        self.fail_progress.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` preflight writes, then let them through.
    pub fn fail_next_preflights(&self, count: usize) {
        self.preflight_failures.store(count, Ordering::SeqCst);
    }

    /// Number of writes rejected so far.
    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.reject());
        }
        Ok(())
    }

    fn reject(&self) -> StoreError {
        self.failed_writes.fetch_add(1, Ordering::SeqCst);
        StoreError::Database("disk I/O error".to_string())
    }
}

impl RequestStore for FlakyRequestStore {
    fn create_request(&self, request: NewRequest) -> Result<Request, StoreError> {
        self.inner.create_request(request)
    }

    fn get(&self, id: &str) -> Result<Option<Request>, StoreError> {
        self.inner.get(id)
    }

    fn list_for_requester(&self, requester_id: &str) -> Result<Vec<Request>, StoreError> {
        self.inner.list_for_requester(requester_id)
    }

    fn upsert_requester(&self, id: &str, priority: i32) -> Result<Requester, StoreError> {
        self.inner.upsert_requester(id, priority)
    }

    fn get_requester(&self, id: &str) -> Result<Option<Requester>, StoreError> {
        self.inner.get_requester(id)
    }

    fn next_eligible_request(&self) -> Result<Option<Request>, StoreError> {
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(StoreError::Database("database is locked".to_string()));
        }
        self.inner.next_eligible_request()
    }

    fn update_preflight(
        &self,
        id: &str,
        name: &str,
        size_bytes: u64,
        started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let armed = self
            .preflight_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if armed.is_ok() {
            return Err(self.reject());
        }
        self.inner.update_preflight(id, name, size_bytes, started_at)
    }

    fn record_progress(&self, id: &str, bytes_completed: u64) -> Result<(), StoreError> {
        self.check_write()?;
        if self.fail_progress.load(Ordering::SeqCst) {
            return Err(self.reject());
        }
        self.inner.record_progress(id, bytes_completed)
    }

    fn update_postflight(
        &self,
        id: &str,
        delivery_ref: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.update_postflight(id, delivery_ref, finished_at)
    }

    fn record_failure(
        &self,
        id: &str,
        error_text: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.record_failure(id, error_text, finished_at)
    }

    fn undelivered_requesters(&self, request_id: &str) -> Result<Vec<Requester>, StoreError> {
        self.inner.undelivered_requesters(request_id)
    }

    fn mark_delivered(&self, request_id: &str, requester_id: &str) -> Result<(), StoreError> {
        self.inner.mark_delivered(request_id, requester_id)
    }

    fn delivery_records(&self, request_id: &str) -> Result<Vec<DeliveryRecord>, StoreError> {
        self.inner.delivery_records(request_id)
    }
}
