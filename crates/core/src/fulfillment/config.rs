//! Fulfillment configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the fulfillment controller and its scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentConfig {
    /// Enable/disable the scheduler loop.
    /// When disabled, requests are accepted but never fulfilled.
    #[serde(default)]
    pub enabled: bool,

    /// How often the scheduler fires an attempt (milliseconds).
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,

    /// How often download progress is observed (milliseconds).
    #[serde(default = "default_load_tick_interval")]
    pub load_tick_interval_ms: u64,

    /// Upper bound on metadata resolution (seconds).
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Upper bound on a payload download (seconds).
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Upper bound on relaying a payload (seconds).
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Payloads of this size or larger are rejected before download.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size_bytes: u64,

    /// Where completed payloads are relayed (chat id for Telegram).
    #[serde(default)]
    pub distribution_target: String,

    /// Maximum attempts running at once (0 = unlimited).
    /// A tick with no free slot is skipped.
    #[serde(default = "default_max_concurrent_attempts")]
    pub max_concurrent_attempts: usize,

    /// How long stop() waits for in-flight attempts before cancelling them (seconds).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Claims older than this with no terminal state are claimable again (seconds).
    /// Unset disables reclaiming.
    #[serde(default)]
    pub reclaim_after_secs: Option<u64>,
}

fn default_scan_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_load_tick_interval() -> u64 {
    2_000 // 2 seconds
}

fn default_metadata_timeout() -> u64 {
    60
}

fn default_download_timeout() -> u64 {
    3600 // 1 hour
}

fn default_delivery_timeout() -> u64 {
    600
}

fn default_max_payload_size() -> u64 {
    50 * 1024 * 1024
}

fn default_max_concurrent_attempts() -> usize {
    1
}

fn default_drain_timeout() -> u64 {
    30
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_interval_ms: default_scan_interval(),
            load_tick_interval_ms: default_load_tick_interval(),
            metadata_timeout_secs: default_metadata_timeout(),
            download_timeout_secs: default_download_timeout(),
            delivery_timeout_secs: default_delivery_timeout(),
            max_payload_size_bytes: default_max_payload_size(),
            distribution_target: String::new(),
            max_concurrent_attempts: default_max_concurrent_attempts(),
            drain_timeout_secs: default_drain_timeout(),
            reclaim_after_secs: None,
        }
    }
}

impl FulfillmentConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn load_tick_interval(&self) -> Duration {
        Duration::from_millis(self.load_tick_interval_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn reclaim_after(&self) -> Option<Duration> {
        self.reclaim_after_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FulfillmentConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.scan_interval(), Duration::from_secs(10));
        assert_eq!(config.load_tick_interval(), Duration::from_secs(2));
        assert_eq!(config.download_timeout(), Duration::from_secs(3600));
        assert_eq!(config.max_concurrent_attempts, 1);
        assert!(config.reclaim_after().is_none());
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            enabled = true
            distribution_target = "-1001234"
        "#;
        let config: FulfillmentConfig = toml::from_str(toml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.distribution_target, "-1001234");
        assert_eq!(config.max_payload_size_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            enabled = true
            scan_interval_ms = 500
            load_tick_interval_ms = 250
            metadata_timeout_secs = 10
            download_timeout_secs = 120
            delivery_timeout_secs = 30
            max_payload_size_bytes = 1000
            distribution_target = "chan"
            max_concurrent_attempts = 0
            drain_timeout_secs = 5
            reclaim_after_secs = 7200
        "#;
        let config: FulfillmentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scan_interval(), Duration::from_millis(500));
        assert_eq!(config.load_tick_interval(), Duration::from_millis(250));
        assert_eq!(config.max_concurrent_attempts, 0);
        assert_eq!(config.reclaim_after(), Some(Duration::from_secs(7200)));
    }
}
