//! librqbit embedded torrent backend.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session, SessionOptions,
    SessionPersistenceConfig, TorrentStatsState,
};
use tracing::{debug, info, warn};

use super::{LoaderError, ResolvedPayload, TorrentBackend, TransferProgress};
use crate::config::LoaderConfig;

/// Torrent backend running an in-process librqbit session.
pub struct LibrqbitBackend {
    session: Arc<Session>,
    download_path: PathBuf,
}

impl LibrqbitBackend {
    /// Create a new librqbit session from configuration.
    pub async fn new(config: &LoaderConfig) -> Result<Self, LoaderError> {
        let download_path = PathBuf::from(&config.download_path);

        if !download_path.exists() {
            std::fs::create_dir_all(&download_path).map_err(|e| {
                LoaderError::Download(format!("Failed to create download directory: {}", e))
            })?;
        }

        let mut opts = SessionOptions::default();

        if !config.enable_dht {
            opts.disable_dht = true;
        }

        // Range, not RangeInclusive
        if let Some(port) = config.listen_port {
            opts.listen_port_range = Some(port..(port + 1));
        }

        if let Some(ref persistence_path) = config.persistence_path {
            let persistence_dir = PathBuf::from(persistence_path);
            if !persistence_dir.exists() {
                std::fs::create_dir_all(&persistence_dir).map_err(|e| {
                    LoaderError::Download(format!(
                        "Failed to create persistence directory: {}",
                        e
                    ))
                })?;
            }
            opts.persistence = Some(SessionPersistenceConfig::Json {
                folder: Some(persistence_dir),
            });
        }

        info!(
            download_path = %download_path.display(),
            dht_enabled = !opts.disable_dht,
            "Initializing librqbit session"
        );

        let session = Session::new_with_opts(download_path.clone(), opts)
            .await
            .map_err(|e| {
                LoaderError::Download(format!("Failed to initialize librqbit session: {}", e))
            })?;

        if let Some(port) = session.tcp_listen_port() {
            info!(port = port, "librqbit listening on TCP port");
        }

        Ok(Self {
            session,
            download_path,
        })
    }

    /// Format info hash as lowercase hex string.
    fn format_hash(hash: &librqbit_core::Id20) -> String {
        hash.as_string()
    }

    fn find_torrent(&self, hash: &str) -> Result<Arc<ManagedTorrent>, LoaderError> {
        let hash_lower = hash.to_lowercase();

        self.session
            .with_torrents(|iter| {
                for (_, torrent) in iter {
                    if Self::format_hash(&torrent.info_hash()) == hash_lower {
                        return Some(torrent.clone());
                    }
                }
                None
            })
            .ok_or_else(|| LoaderError::Download(format!("torrent {} is not managed", hash)))
    }

    fn to_payload(&self, locator: &str, handle: &Arc<ManagedTorrent>) -> ResolvedPayload {
        let hash = Self::format_hash(&handle.info_hash());
        let name = handle
            .name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("torrent-{}", &hash[..8.min(hash.len())]));

        ResolvedPayload {
            locator: locator.to_string(),
            local_path: self.download_path.join(&name),
            size_bytes: handle.stats().total_bytes,
            handle: hash,
            name,
        }
    }
}

#[async_trait]
impl TorrentBackend for LibrqbitBackend {
    fn name(&self) -> &str {
        "librqbit"
    }

    async fn fetch_metadata(&self, locator: &str) -> Result<ResolvedPayload, LoaderError> {
        // Added paused: librqbit resolves metadata for magnets before returning.
        let opts = AddTorrentOptions {
            paused: true,
            ..Default::default()
        };

        let response = self
            .session
            .add_torrent(AddTorrent::from_url(locator), Some(opts))
            .await
            .map_err(|e| LoaderError::Resolution(format!("Failed to add torrent: {}", e)))?;

        match response {
            AddTorrentResponse::Added(_, handle) => {
                let payload = self.to_payload(locator, &handle);
                debug!(hash = %payload.handle, name = %payload.name, "Torrent metadata resolved");
                Ok(payload)
            }
            AddTorrentResponse::AlreadyManaged(_, handle) => {
                let payload = self.to_payload(locator, &handle);
                warn!(hash = %payload.handle, "Torrent already managed, reusing it");
                Ok(payload)
            }
            AddTorrentResponse::ListOnly(_) => Err(LoaderError::Resolution(
                "Torrent was added in list-only mode".to_string(),
            )),
        }
    }

    async fn start(&self, payload: &ResolvedPayload) -> Result<(), LoaderError> {
        let torrent = self.find_torrent(&payload.handle)?;

        if !torrent.is_paused() {
            return Ok(());
        }

        self.session
            .unpause(&torrent)
            .await
            .map_err(|e| LoaderError::Download(format!("Failed to start torrent: {}", e)))?;

        debug!(hash = %payload.handle, "Torrent started");
        Ok(())
    }

    async fn progress(&self, payload: &ResolvedPayload) -> Result<TransferProgress, LoaderError> {
        let torrent = self.find_torrent(&payload.handle)?;
        let stats = torrent.stats();

        if let TorrentStatsState::Error = stats.state {
            return Err(LoaderError::Download(
                stats
                    .error
                    .unwrap_or_else(|| "torrent entered error state".to_string()),
            ));
        }

        Ok(TransferProgress {
            total_bytes: stats.total_bytes,
            bytes_completed: stats.progress_bytes,
        })
    }

    async fn stop(&self, payload: &ResolvedPayload) -> Result<(), LoaderError> {
        let torrent = self.find_torrent(&payload.handle)?;

        if torrent.is_paused() {
            return Ok(());
        }

        self.session
            .pause(&torrent)
            .await
            .map_err(|e| LoaderError::Download(format!("Failed to pause torrent: {}", e)))?;

        debug!(hash = %payload.handle, "Torrent paused");
        Ok(())
    }

    async fn release(&self, payload: &ResolvedPayload) -> Result<(), LoaderError> {
        let torrent = self.find_torrent(&payload.handle)?;

        self.session
            .delete(torrent.id().into(), true)
            .await
            .map_err(|e| LoaderError::Download(format!("Failed to remove torrent: {}", e)))?;

        debug!(hash = %payload.handle, "Torrent removed");
        Ok(())
    }
}
