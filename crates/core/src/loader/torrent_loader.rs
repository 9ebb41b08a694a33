//! Deadline- and tick-driven payload loader on top of a torrent backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{LoaderError, PayloadLoader, ProgressCallback, ResolvedPayload, TorrentBackend};
use crate::metrics;

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Payload loader that polls a [`TorrentBackend`] on a fixed tick.
pub struct TorrentLoader {
    backend: Arc<dyn TorrentBackend>,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

impl TorrentLoader {
    pub fn new(
        backend: Arc<dyn TorrentBackend>,
        metadata_timeout: Duration,
        download_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            metadata_timeout,
            download_timeout,
        }
    }

    /// Pause a transfer that is being abandoned. Failures only get logged.
    async fn halt(&self, payload: &ResolvedPayload) {
        if let Err(e) = self.backend.stop(payload).await {
            warn!(
                backend = self.backend.name(),
                handle = %payload.handle,
                error = %e,
                "Failed to pause abandoned transfer"
            );
        }
    }

    fn observe(&self, result: &str, started: Instant) {
        metrics::DOWNLOAD_DURATION
            .with_label_values(&[result])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl PayloadLoader for TorrentLoader {
    async fn resolve_metadata(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedPayload, LoaderError> {
        debug!(backend = self.backend.name(), locator = %locator, "Resolving metadata");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LoaderError::Cancelled),
            res = tokio::time::timeout(self.metadata_timeout, self.backend.fetch_metadata(locator)) => {
                match res {
                    Ok(resolved) => resolved,
                    Err(_) => Err(LoaderError::ResolutionTimeout(self.metadata_timeout)),
                }
            }
        }
    }

    async fn download(
        &self,
        payload: &ResolvedPayload,
        tick: Duration,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<u64, LoaderError> {
        if cancel.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        let started = Instant::now();
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.download_timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        self.backend.start(payload).await?;
        metrics::DOWNLOADS_STARTED.inc();

        info!(
            backend = self.backend.name(),
            handle = %payload.handle,
            name = %payload.name,
            size_bytes = payload.size_bytes,
            "Download started"
        );

        let timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout);

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.halt(payload).await;
                    self.observe("cancelled", started);
                    return Err(LoaderError::Cancelled);
                }
                _ = &mut timeout => {
                    self.halt(payload).await;
                    self.observe("timeout", started);
                    return Err(LoaderError::DownloadTimeout(self.download_timeout));
                }
                _ = ticker.tick() => {
                    let progress = match self.backend.progress(payload).await {
                        Ok(progress) => progress,
                        Err(e) => {
                            self.halt(payload).await;
                            self.observe("failed", started);
                            return Err(e);
                        }
                    };

                    on_progress(progress);

                    if progress.is_complete() {
                        self.observe("completed", started);
                        metrics::BYTES_DOWNLOADED.inc_by(progress.bytes_completed);
                        info!(
                            handle = %payload.handle,
                            bytes = progress.bytes_completed,
                            elapsed_secs = started.elapsed().as_secs(),
                            "Download completed"
                        );
                        return Ok(progress.bytes_completed);
                    }
                }
            }
        }
    }

    async fn release(&self, payload: &ResolvedPayload) -> Result<(), LoaderError> {
        self.backend.release(payload).await?;
        debug!(backend = self.backend.name(), handle = %payload.handle, "Payload released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TransferProgress;
    use crate::testing::MockTorrentBackend;
    use std::sync::Mutex;

    fn loader(backend: Arc<MockTorrentBackend>) -> TorrentLoader {
        TorrentLoader::new(backend, Duration::from_secs(5), Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_reports_progress_until_complete() {
        let backend = Arc::new(MockTorrentBackend::new());
        let payload = backend.add_payload("magnet:?xt=urn:btih:aa", "movie.mkv", 300);
        backend.set_progress_script(&payload.handle, vec![100, 200, 300]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let on_progress = move |p: TransferProgress| seen_cb.lock().unwrap().push(p.bytes_completed);

        let bytes = loader(backend.clone())
            .download(
                &payload,
                Duration::from_secs(2),
                &on_progress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(bytes, 300);
        assert_eq!(*seen.lock().unwrap(), vec![100, 200, 300]);
        assert_eq!(backend.start_calls(), 1);
        assert_eq!(backend.stop_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_times_out_within_one_tick() {
        let backend = Arc::new(MockTorrentBackend::new());
        let payload = backend.add_payload("magnet:?xt=urn:btih:bb", "stuck.iso", 1000);

        let begin = tokio::time::Instant::now();
        let result = loader(backend.clone())
            .download(
                &payload,
                Duration::from_secs(2),
                &|_: TransferProgress| {},
                &CancellationToken::new(),
            )
            .await;
        let elapsed = begin.elapsed();

        assert!(matches!(result, Err(LoaderError::DownloadTimeout(_))));
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed <= Duration::from_secs(32));
        assert_eq!(backend.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_cancelled() {
        let backend = Arc::new(MockTorrentBackend::new());
        let payload = backend.add_payload("magnet:?xt=urn:btih:cc", "slow.iso", 1000);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = loader(backend.clone())
            .download(&payload, Duration::from_secs(2), &|_: TransferProgress| {}, &cancel)
            .await;

        assert!(matches!(result, Err(LoaderError::Cancelled)));
        assert_eq!(backend.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_aborts_download() {
        let backend = Arc::new(MockTorrentBackend::new());
        let payload = backend.add_payload("magnet:?xt=urn:btih:dd", "broken.bin", 10);
        backend.set_next_progress_error(LoaderError::Download("disk full".to_string()));

        let result = loader(backend.clone())
            .download(
                &payload,
                Duration::from_secs(2),
                &|_: TransferProgress| {},
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(LoaderError::Download(msg)) if msg == "disk full"));
        assert_eq!(backend.stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_timeout() {
        let backend = Arc::new(MockTorrentBackend::new());
        backend.set_metadata_delay(Duration::from_secs(60));
        backend.add_payload("magnet:?xt=urn:btih:ee", "late.mkv", 10);

        let result = loader(backend)
            .resolve_metadata("magnet:?xt=urn:btih:ee", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LoaderError::ResolutionTimeout(d)) if d == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_download_timeout_does_not_overflow() {
        let backend = Arc::new(MockTorrentBackend::new());
        let payload = backend.add_payload("magnet:?xt=urn:btih:ab", "huge.iso", 20);
        backend.set_progress_script(&payload.handle, vec![10, 20]);

        let loader = TorrentLoader::new(backend.clone(), Duration::from_secs(5), Duration::MAX);
        let bytes = loader
            .download(
                &payload,
                Duration::from_secs(2),
                &|_: TransferProgress| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(bytes, 20);
    }

    #[tokio::test]
    async fn test_release_reaches_backend() {
        let backend = Arc::new(MockTorrentBackend::new());
        let payload = backend.add_payload("magnet:?xt=urn:btih:ac", "done.mkv", 10);

        loader(backend.clone()).release(&payload).await.unwrap();

        assert_eq!(backend.release_calls(), 1);
        assert_eq!(backend.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_locator_fails() {
        let backend = Arc::new(MockTorrentBackend::new());
        let result = loader(backend)
            .resolve_metadata("magnet:?xt=urn:btih:ff", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LoaderError::Resolution(_))));
    }
}
