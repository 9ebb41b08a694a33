//! Mock payload loader for testing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::loader::{LoaderError, PayloadLoader, ProgressCallback, ResolvedPayload, TransferProgress};

/// Mock implementation of the PayloadLoader trait.
///
/// Every locator resolves to the configured payload (name and size). A
/// download reports half and then full progress, optionally after a delay
/// that honours cancellation.
#[derive(Debug)]
pub struct MockPayloadLoader {
    name: Mutex<String>,
    size_bytes: Mutex<u64>,
    download_dir: PathBuf,
    resolution_error: Mutex<Option<LoaderError>>,
    download_error: Mutex<Option<LoaderError>>,
    download_delay: Mutex<Option<Duration>>,
    resolve_calls: AtomicUsize,
    download_calls: AtomicUsize,
    released: Mutex<Vec<ResolvedPayload>>,
    downloaded: Mutex<Vec<ResolvedPayload>>,
}

impl Default for MockPayloadLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPayloadLoader {
    pub fn new() -> Self {
        Self::with_download_dir("/mock/downloads")
    }

    pub fn with_download_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            name: Mutex::new("payload.bin".to_string()),
            size_bytes: Mutex::new(1024),
            download_dir: dir.into(),
            resolution_error: Mutex::new(None),
            download_error: Mutex::new(None),
            download_delay: Mutex::new(None),
            resolve_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
            downloaded: Mutex::new(Vec::new()),
        }
    }

    /// Name and size every locator resolves to.
    pub fn set_payload(&self, name: &str, size_bytes: u64) {
        *self.name.lock().unwrap() = name.to_string();
        *self.size_bytes.lock().unwrap() = size_bytes;
    }

    /// Make the next resolution fail.
    pub fn set_resolution_error(&self, error: LoaderError) {
        *self.resolution_error.lock().unwrap() = Some(error);
    }

    /// Make the next download fail.
    pub fn set_download_error(&self, error: LoaderError) {
        *self.download_error.lock().unwrap() = Some(error);
    }

    /// Make every download take this long before completing.
    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = Some(delay);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.released.lock().unwrap().len()
    }

    /// Payloads handed back through `release`, in order.
    pub fn released(&self) -> Vec<ResolvedPayload> {
        self.released.lock().unwrap().clone()
    }

    /// Payloads that finished downloading.
    pub fn downloaded(&self) -> Vec<ResolvedPayload> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl PayloadLoader for MockPayloadLoader {
    async fn resolve_metadata(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedPayload, LoaderError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }
        if let Some(err) = self.resolution_error.lock().unwrap().take() {
            return Err(err);
        }

        let name = self.name.lock().unwrap().clone();
        let size_bytes = *self.size_bytes.lock().unwrap();
        let handle = format!("{:x}", locator.len() as u64 * 0x9e37 + size_bytes);

        Ok(ResolvedPayload {
            locator: locator.to_string(),
            handle,
            local_path: self.download_dir.join(&name),
            name,
            size_bytes,
        })
    }

    async fn download(
        &self,
        payload: &ResolvedPayload,
        _tick: Duration,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<u64, LoaderError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.download_error.lock().unwrap().take() {
            return Err(err);
        }

        on_progress(TransferProgress {
            total_bytes: payload.size_bytes,
            bytes_completed: payload.size_bytes / 2,
        });

        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(LoaderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        on_progress(TransferProgress {
            total_bytes: payload.size_bytes,
            bytes_completed: payload.size_bytes,
        });

        self.downloaded.lock().unwrap().push(payload.clone());
        Ok(payload.size_bytes)
    }

    async fn release(&self, payload: &ResolvedPayload) -> Result<(), LoaderError> {
        self.released.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
