//! Mock relay uploader for testing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::relay::{DeliveryRef, RelayError, RelayUploader};

/// A recorded delivery for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDelivery {
    pub path: PathBuf,
    pub target: String,
}

/// Mock implementation of the RelayUploader trait.
///
/// Records every delivery and hands out `msg-<n>` references unless told
/// otherwise.
#[derive(Debug, Default)]
pub struct MockRelayUploader {
    deliveries: Mutex<Vec<RecordedDelivery>>,
    next_ref: Mutex<Option<String>>,
    next_error: Mutex<Option<RelayError>>,
    delay: Mutex<Option<Duration>>,
    counter: AtomicUsize,
}

impl MockRelayUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries, including failed ones.
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Reference returned by the next successful delivery.
    pub fn set_next_ref(&self, delivery_ref: &str) {
        *self.next_ref.lock().unwrap() = Some(delivery_ref.to_string());
    }

    /// Configure the next delivery to fail with the given error.
    pub fn set_next_error(&self, error: RelayError) {
        *self.next_error.lock().unwrap() = Some(error);
    }

    /// Make every delivery take this long.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl RelayUploader for MockRelayUploader {
    fn name(&self) -> &str {
        "mock"
    }

    async fn deliver(&self, path: &Path, target: &str) -> Result<DeliveryRef, RelayError> {
        self.deliveries.lock().unwrap().push(RecordedDelivery {
            path: path.to_path_buf(),
            target: target.to_string(),
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.next_error.lock().unwrap().take() {
            return Err(err);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery_ref = self
            .next_ref
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| format!("msg-{}", n));

        Ok(DeliveryRef::new(delivery_ref))
    }
}
