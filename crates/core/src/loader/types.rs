//! Types for payload loading.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while resolving or downloading a payload.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("metadata resolution timed out after {0:?}")]
    ResolutionTimeout(Duration),

    #[error("metadata resolution failed: {0}")]
    Resolution(String),

    #[error("download timed out after {0:?}")]
    DownloadTimeout(Duration),

    #[error("download failed: {0}")]
    Download(String),

    #[error("cancelled")]
    Cancelled,
}

/// Metadata of a payload, known before its content is downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPayload {
    /// Locator the payload was resolved from.
    pub locator: String,
    /// Backend handle (info hash for torrents).
    pub handle: String,
    /// Payload name.
    pub name: String,
    /// Total payload size in bytes.
    pub size_bytes: u64,
    /// Where the payload lands on disk once downloaded.
    pub local_path: PathBuf,
}

/// Snapshot of transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub bytes_completed: u64,
}

impl TransferProgress {
    pub fn is_complete(&self) -> bool {
        self.bytes_completed >= self.total_bytes
    }

    /// Completion in percent, clamped to 100.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_completed as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

/// Progress observer passed to [`PayloadLoader::download`].
pub type ProgressCallback = dyn Fn(TransferProgress) + Send + Sync;

/// Peer-to-peer engine primitives the loader is built on.
#[async_trait]
pub trait TorrentBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Register the locator and wait until its metadata is known.
    /// The transfer must not start yet.
    async fn fetch_metadata(&self, locator: &str) -> Result<ResolvedPayload, LoaderError>;

    /// Start (or resume) transferring the payload.
    async fn start(&self, payload: &ResolvedPayload) -> Result<(), LoaderError>;

    /// Current transfer progress. Errors are terminal transfer failures.
    async fn progress(&self, payload: &ResolvedPayload) -> Result<TransferProgress, LoaderError>;

    /// Pause the transfer.
    async fn stop(&self, payload: &ResolvedPayload) -> Result<(), LoaderError>;

    /// Forget the payload and delete its files.
    async fn release(&self, payload: &ResolvedPayload) -> Result<(), LoaderError>;
}

/// Resolves locators and downloads payloads with bounded time.
#[async_trait]
pub trait PayloadLoader: Send + Sync {
    /// Resolve a locator to payload metadata.
    async fn resolve_metadata(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedPayload, LoaderError>;

    /// Download a resolved payload, calling `on_progress` every `tick`.
    ///
    /// Returns the number of bytes downloaded.
    async fn download(
        &self,
        payload: &ResolvedPayload,
        tick: Duration,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<u64, LoaderError>;

    /// Drop everything held for a payload once its attempt is over.
    async fn release(&self, payload: &ResolvedPayload) -> Result<(), LoaderError>;
}
