//! Mock torrent backend for testing.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::loader::{LoaderError, ResolvedPayload, TorrentBackend, TransferProgress};

#[derive(Debug, Default)]
struct TransferState {
    /// Values returned by successive progress calls.
    script: VecDeque<u64>,
    /// Sticky value once the script runs out.
    current: u64,
}

/// Mock implementation of the TorrentBackend trait.
///
/// Provides controllable behavior for testing:
/// - Register payloads that metadata resolution will find
/// - Script progress values returned on each tick
/// - Simulate slow metadata and transfer failures
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockTorrentBackend::new();
/// let payload = backend.add_payload("magnet:?xt=urn:btih:abc", "movie.mkv", 300);
/// backend.set_progress_script(&payload.handle, vec![100, 200, 300]);
/// ```
#[derive(Debug)]
pub struct MockTorrentBackend {
    payloads: Mutex<HashMap<String, ResolvedPayload>>,
    transfers: Mutex<HashMap<String, TransferState>>,
    next_progress_error: Mutex<Option<LoaderError>>,
    metadata_delay: Mutex<Option<Duration>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    release_calls: AtomicUsize,
    hash_counter: AtomicUsize,
    download_dir: PathBuf,
}

impl Default for MockTorrentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTorrentBackend {
    pub fn new() -> Self {
        Self::with_download_dir("/mock/downloads")
    }

    /// Create a mock backend whose payloads land in `dir`.
    pub fn with_download_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            next_progress_error: Mutex::new(None),
            metadata_delay: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            hash_counter: AtomicUsize::new(0),
            download_dir: dir.into(),
        }
    }

    /// Register a payload that `fetch_metadata(locator)` will resolve to.
    pub fn add_payload(&self, locator: &str, name: &str, size_bytes: u64) -> ResolvedPayload {
        let handle = extract_hash_from_magnet(locator).unwrap_or_else(|| {
            let n = self.hash_counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("mockhash{:08x}", n)
        });

        let payload = ResolvedPayload {
            locator: locator.to_string(),
            handle: handle.clone(),
            name: name.to_string(),
            size_bytes,
            local_path: self.download_dir.join(name),
        };

        self.payloads
            .lock()
            .unwrap()
            .insert(locator.to_string(), payload.clone());
        self.transfers.lock().unwrap().entry(handle).or_default();

        payload
    }

    /// Values returned by successive `progress` calls for a transfer.
    pub fn set_progress_script(&self, handle: &str, script: Vec<u64>) {
        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers.entry(handle.to_string()).or_default();
        transfer.script = script.into();
    }

    /// Make the next `progress` call fail.
    pub fn set_next_progress_error(&self, error: LoaderError) {
        *self.next_progress_error.lock().unwrap() = Some(error);
    }

    /// Delay every metadata lookup.
    pub fn set_metadata_delay(&self, delay: Duration) {
        *self.metadata_delay.lock().unwrap() = Some(delay);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TorrentBackend for MockTorrentBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_metadata(&self, locator: &str) -> Result<ResolvedPayload, LoaderError> {
        let delay = *self.metadata_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.payloads
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| LoaderError::Resolution(format!("no metadata for {}", locator)))
    }

    async fn start(&self, _payload: &ResolvedPayload) -> Result<(), LoaderError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn progress(&self, payload: &ResolvedPayload) -> Result<TransferProgress, LoaderError> {
        if let Some(err) = self.next_progress_error.lock().unwrap().take() {
            return Err(err);
        }

        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers.entry(payload.handle.clone()).or_default();
        if let Some(next) = transfer.script.pop_front() {
            transfer.current = next;
        }

        Ok(TransferProgress {
            total_bytes: payload.size_bytes,
            bytes_completed: transfer.current,
        })
    }

    async fn stop(&self, _payload: &ResolvedPayload) -> Result<(), LoaderError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, payload: &ResolvedPayload) -> Result<(), LoaderError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.transfers.lock().unwrap().remove(&payload.handle);
        Ok(())
    }
}

/// Extract info hash from magnet URI if present.
fn extract_hash_from_magnet(uri: &str) -> Option<String> {
    uri.split(['?', '&'])
        .find_map(|part| part.strip_prefix("xt=urn:btih:"))
        .map(|h| h.to_lowercase())
}
