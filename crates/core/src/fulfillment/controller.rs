//! Fulfillment controller: claim, load, relay, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::FulfillmentConfig;
use super::types::{AttemptError, AttemptOutcome, StatusAlertCallback};
use crate::loader::{LoaderError, PayloadLoader, ResolvedPayload, TransferProgress};
use crate::metrics;
use crate::relay::{DeliveryRef, RelayError, RelayUploader};
use crate::request::{Request, RequestStore, StoreError};

/// Tries per terminal status write before giving up.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(200);

/// Drives one request per attempt from claim to a recorded outcome.
///
/// Holds no per-request state between attempts; the store is the only
/// shared mutable resource.
pub struct FulfillmentController {
    config: FulfillmentConfig,
    store: Arc<dyn RequestStore>,
    loader: Arc<dyn PayloadLoader>,
    relay: Arc<dyn RelayUploader>,
    alert: Option<StatusAlertCallback>,
}

impl FulfillmentController {
    pub fn new(
        config: FulfillmentConfig,
        store: Arc<dyn RequestStore>,
        loader: Arc<dyn PayloadLoader>,
        relay: Arc<dyn RelayUploader>,
    ) -> Self {
        Self {
            config,
            store,
            loader,
            relay,
            alert: None,
        }
    }

    /// Call `alert` for every status write that could not be persisted.
    pub fn with_alert_callback(mut self, alert: StatusAlertCallback) -> Self {
        self.alert = Some(alert);
        self
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    /// Run one attempt: claim the next eligible request and see it through.
    ///
    /// Failures are recorded against the request before being returned.
    pub async fn attempt(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, AttemptError> {
        let request = match self.store.next_eligible_request() {
            Ok(Some(request)) => request,
            Ok(None) => {
                metrics::ATTEMPTS
                    .with_label_values(&["no_eligible_request"])
                    .inc();
                return Ok(AttemptOutcome::NoEligibleRequest);
            }
            Err(e) => {
                let err = self.status_write_failed(None, e, Some("claim failed".to_string()));
                metrics::ATTEMPTS.with_label_values(&[err.kind()]).inc();
                return Err(err);
            }
        };

        info!(
            request_id = %request.id,
            locator = %request.locator,
            created_at = %request.created_at,
            "Claimed request"
        );

        let started = Instant::now();
        metrics::ATTEMPTS_IN_FLIGHT.inc();
        let result = self.fulfill(&request, cancel).await;
        metrics::ATTEMPTS_IN_FLIGHT.dec();

        let outcome = match &result {
            Ok(_) => "delivered",
            Err(e) => e.kind(),
        };
        metrics::ATTEMPTS.with_label_values(&[outcome]).inc();
        metrics::ATTEMPT_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn fulfill(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, AttemptError> {
        let request_id = request.id.clone();

        let payload = match self.loader.resolve_metadata(&request.locator, cancel).await {
            Ok(payload) => payload,
            Err(LoaderError::Cancelled) => {
                return self.fail(AttemptError::Cancelled { request_id }).await
            }
            Err(source) => {
                return self
                    .fail(AttemptError::MetadataResolutionFailed { request_id, source })
                    .await
            }
        };

        debug!(
            request_id = %request_id,
            name = %payload.name,
            size_bytes = payload.size_bytes,
            "Metadata resolved"
        );

        let result = self.process(request_id, &payload, cancel).await;
        self.release(&payload).await;
        result
    }

    /// Everything after a successful resolve. The caller releases the payload.
    async fn process(
        &self,
        request_id: String,
        payload: &ResolvedPayload,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, AttemptError> {
        if payload.size_bytes >= self.config.max_payload_size_bytes {
            return self
                .fail(AttemptError::PayloadTooLarge {
                    request_id,
                    size_bytes: payload.size_bytes,
                    max_bytes: self.config.max_payload_size_bytes,
                })
                .await;
        }

        let started_at = Utc::now();
        if let Err(e) = self
            .retry_write(|| {
                self.store
                    .update_preflight(&request_id, &payload.name, payload.size_bytes, started_at)
            })
            .await
        {
            // The claim is already taken, so leave a terminal record behind.
            let error_text = format!("status write failed (preflight not recorded): {}", e);
            if let Err(record_err) = self
                .retry_write(|| {
                    self.store
                        .record_failure(&request_id, &error_text, Utc::now())
                })
                .await
            {
                warn!(
                    request_id = %request_id,
                    error = %record_err,
                    "Failed to record preflight failure"
                );
            }
            return Err(self.status_write_failed(
                Some(request_id),
                e,
                Some("preflight not recorded".to_string()),
            ));
        }

        let downloaded = match self.download(&request_id, payload, cancel).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(e).await,
        };

        info!(
            request_id = %request_id,
            name = %payload.name,
            bytes = downloaded,
            "Payload downloaded, relaying"
        );

        let delivery_ref = match self.deliver(&request_id, payload, cancel).await {
            Ok(delivery_ref) => delivery_ref,
            Err(e) => return self.fail(e).await,
        };

        let finished_at = Utc::now();
        if let Err(e) = self
            .retry_write(|| {
                self.store
                    .update_postflight(&request_id, delivery_ref.as_str(), finished_at)
            })
            .await
        {
            return Err(self.status_write_failed(
                Some(request_id),
                e,
                Some(format!("delivered as {} but not recorded", delivery_ref)),
            ));
        }

        info!(
            request_id = %request_id,
            delivery_ref = %delivery_ref,
            "Request delivered"
        );

        Ok(AttemptOutcome::Delivered {
            request_id,
            delivery_ref,
        })
    }

    /// Hand the payload back to the loader. Failures only get logged.
    async fn release(&self, payload: &ResolvedPayload) {
        if let Err(e) = self.loader.release(payload).await {
            warn!(handle = %payload.handle, error = %e, "Failed to release payload");
        }
    }

    async fn download(
        &self,
        request_id: &str,
        payload: &ResolvedPayload,
        cancel: &CancellationToken,
    ) -> Result<u64, AttemptError> {
        let store = Arc::clone(&self.store);
        let progress_id = request_id.to_string();

        // Advisory only: a failed progress write never stops the download.
        let on_progress = move |progress: TransferProgress| {
            debug!(
                request_id = %progress_id,
                bytes_completed = progress.bytes_completed,
                total_bytes = progress.total_bytes,
                percent = format!("{:.1}", progress.percent()),
                "Download progress"
            );
            if let Err(e) = store.record_progress(&progress_id, progress.bytes_completed) {
                warn!(request_id = %progress_id, error = %e, "Failed to record progress");
            }
        };

        self.loader
            .download(
                payload,
                self.config.load_tick_interval(),
                &on_progress,
                cancel,
            )
            .await
            .map_err(|e| match e {
                LoaderError::DownloadTimeout(timeout) => AttemptError::DownloadTimeout {
                    request_id: request_id.to_string(),
                    timeout,
                },
                LoaderError::Cancelled => AttemptError::Cancelled {
                    request_id: request_id.to_string(),
                },
                source => AttemptError::DownloadFailed {
                    request_id: request_id.to_string(),
                    source,
                },
            })
    }

    async fn deliver(
        &self,
        request_id: &str,
        payload: &ResolvedPayload,
        cancel: &CancellationToken,
    ) -> Result<DeliveryRef, AttemptError> {
        let delivery = self
            .relay
            .deliver(&payload.local_path, &self.config.distribution_target);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                metrics::DELIVERIES.with_label_values(&["cancelled"]).inc();
                return Err(AttemptError::Cancelled {
                    request_id: request_id.to_string(),
                });
            }
            res = tokio::time::timeout(self.config.delivery_timeout(), delivery) => match res {
                Ok(res) => res,
                Err(_) => Err(RelayError::Timeout),
            },
        };

        match result {
            Ok(delivery_ref) => {
                metrics::DELIVERIES.with_label_values(&["success"]).inc();
                Ok(delivery_ref)
            }
            Err(source) => {
                let label = match source {
                    RelayError::Timeout => "timeout",
                    _ => "failed",
                };
                metrics::DELIVERIES.with_label_values(&[label]).inc();
                Err(AttemptError::DeliveryFailed {
                    request_id: request_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Record a failed attempt and hand the error back.
    async fn fail(&self, error: AttemptError) -> Result<AttemptOutcome, AttemptError> {
        let Some(request_id) = error.request_id().map(str::to_string) else {
            return Err(error);
        };

        warn!(
            request_id = %request_id,
            kind = error.kind(),
            error = %error,
            "Attempt failed"
        );

        let error_text = error.to_string();
        let finished_at = Utc::now();

        match self
            .retry_write(|| {
                self.store
                    .record_failure(&request_id, &error_text, finished_at)
            })
            .await
        {
            Ok(()) => Err(error),
            Err(e) => Err(self.status_write_failed(Some(request_id), e, Some(error_text))),
        }
    }

    /// Repeat an idempotent terminal write a few times before giving up.
    async fn retry_write<F>(&self, write: F) -> Result<(), StoreError>
    where
        F: Fn() -> Result<(), StoreError>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match write() {
                Ok(()) => return Ok(()),
                // Immutable or missing rows will not fix themselves.
                Err(e @ (StoreError::AlreadyDelivered(_) | StoreError::NotFound(_))) => {
                    return Err(e)
                }
                Err(e) if tries >= TERMINAL_WRITE_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(error = %e, attempt = tries, "Status write failed, retrying");
                    tokio::time::sleep(TERMINAL_WRITE_BACKOFF * tries).await;
                }
            }
        }
    }

    fn status_write_failed(
        &self,
        request_id: Option<String>,
        source: StoreError,
        cause: Option<String>,
    ) -> AttemptError {
        error!(
            request_id = request_id.as_deref().unwrap_or("-"),
            error = %source,
            cause = cause.as_deref().unwrap_or("-"),
            "Status write failed, request state is stale"
        );
        metrics::STATUS_WRITE_ERRORS.inc();

        let err = AttemptError::StatusWrite {
            request_id,
            source,
            cause,
        };

        if let Some(alert) = &self.alert {
            alert(&err);
        }

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{NewRequest, RequestStatus, SqliteRequestStore};
    use crate::testing::{MockPayloadLoader, MockRelayUploader};

    fn config() -> FulfillmentConfig {
        FulfillmentConfig {
            enabled: true,
            distribution_target: "chat-1".to_string(),
            max_payload_size_bytes: 1_000,
            ..Default::default()
        }
    }

    struct Fixture {
        store: Arc<SqliteRequestStore>,
        loader: Arc<MockPayloadLoader>,
        relay: Arc<MockRelayUploader>,
        controller: FulfillmentController,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let loader = Arc::new(MockPayloadLoader::new());
        let relay = Arc::new(MockRelayUploader::new());
        let controller = FulfillmentController::new(
            config(),
            store.clone(),
            loader.clone(),
            relay.clone(),
        );
        Fixture {
            store,
            loader,
            relay,
            controller,
        }
    }

    #[tokio::test]
    async fn test_empty_store() {
        let f = fixture();
        let outcome = f.controller.attempt(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::NoEligibleRequest);
        assert_eq!(f.loader.resolve_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_recorded() {
        let f = fixture();
        let req = f
            .store
            .create_request(NewRequest::new("magnet:?xt=urn:btih:01", "alice"))
            .unwrap();
        f.loader
            .set_resolution_error(LoaderError::Resolution("no peers".to_string()));

        let err = f
            .controller
            .attempt(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AttemptError::MetadataResolutionFailed { .. }));

        let stored = f.store.get(&req.id).unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Failed);
        assert!(stored.last_error.unwrap().contains("no peers"));
        assert!(stored.started_at.is_none());
        assert_eq!(f.loader.download_calls(), 0);
        assert_eq!(f.loader.release_calls(), 0);
    }

    #[tokio::test]
    async fn test_size_equal_to_limit_is_rejected() {
        let f = fixture();
        f.store
            .create_request(NewRequest::new("magnet:?xt=urn:btih:02", "alice"))
            .unwrap();
        f.loader.set_payload("exact.bin", 1_000);

        let err = f
            .controller
            .attempt(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AttemptError::PayloadTooLarge {
                size_bytes: 1_000,
                max_bytes: 1_000,
                ..
            }
        ));
        assert_eq!(f.loader.download_calls(), 0);
        assert!(f.relay.deliveries().is_empty());
        assert_eq!(f.loader.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_success_records_delivery_ref() {
        let f = fixture();
        let req = f
            .store
            .create_request(NewRequest::new("magnet:?xt=urn:btih:03", "alice"))
            .unwrap();
        f.loader.set_payload("song.mp3", 999);
        f.relay.set_next_ref("msg-9");

        let outcome = f.controller.attempt(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            outcome,
            AttemptOutcome::Delivered {
                request_id: req.id.clone(),
                delivery_ref: DeliveryRef::new("msg-9"),
            }
        );

        let stored = f.store.get(&req.id).unwrap().unwrap();
        assert_eq!(stored.delivery_ref.as_deref(), Some("msg-9"));
        assert_eq!(stored.display_name.as_deref(), Some("song.mp3"));
        assert!(stored.finished_at.is_some());
        assert!(stored.last_error.is_none());

        let released = f.loader.released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].name, "song.mp3");
    }

    #[tokio::test]
    async fn test_status_write_fires_alert() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let store = Arc::new(crate::testing::FlakyRequestStore::new());
        store
            .inner()
            .create_request(NewRequest::new("magnet:?xt=urn:btih:04", "alice"))
            .unwrap();
        store.fail_writes(true);

        let loader = Arc::new(MockPayloadLoader::new());
        loader.set_resolution_error(LoaderError::Resolution("tracker down".to_string()));

        let controller = FulfillmentController::new(
            config(),
            store.clone(),
            loader,
            Arc::new(MockRelayUploader::new()),
        )
        .with_alert_callback(Arc::new(move |_err: &AttemptError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let err = controller
            .attempt(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            AttemptError::StatusWrite {
                request_id, cause, ..
            } => {
                assert!(request_id.is_some());
                assert!(cause.unwrap().contains("tracker down"));
            }
            other => panic!("expected StatusWrite, got {other:?}"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
