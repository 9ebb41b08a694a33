//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the pipeline's seams,
//! allowing end-to-end fulfillment tests without a torrent network or a
//! chat service.
//!
//! # Example
//!
//! ```rust,ignore
//! use torrelay_core::testing::{MockPayloadLoader, MockRelayUploader};
//!
//! let loader = MockPayloadLoader::new();
//! let relay = MockRelayUploader::new();
//!
//! // Configure mock responses
//! loader.set_payload("movie.mkv", 700 * 1024 * 1024);
//! relay.set_next_ref("msg-1");
//!
//! // Wire into a FulfillmentController...
//! ```

mod flaky_store;
mod mock_payload_loader;
mod mock_relay;
mod mock_torrent_backend;

pub use flaky_store::FlakyRequestStore;
pub use mock_payload_loader::MockPayloadLoader;
pub use mock_relay::{MockRelayUploader, RecordedDelivery};
pub use mock_torrent_backend::MockTorrentBackend;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, Utc};

    use crate::fulfillment::FulfillmentConfig;
    use crate::request::NewRequest;

    /// A well-formed magnet locator with a deterministic info hash.
    pub fn magnet(n: u32) -> String {
        format!("magnet:?xt=urn:btih:{:040x}&dn=fixture-{}", n, n)
    }

    /// Intake of `magnet(n)` on behalf of `requester`, created at `at`.
    pub fn new_request(n: u32, requester: &str, at: DateTime<Utc>) -> NewRequest {
        NewRequest::new(magnet(n), requester).with_created_at(at)
    }

    /// Fast-ticking enabled configuration for tests.
    pub fn fulfillment_config() -> FulfillmentConfig {
        FulfillmentConfig {
            enabled: true,
            scan_interval_ms: 100,
            load_tick_interval_ms: 50,
            metadata_timeout_secs: 5,
            download_timeout_secs: 30,
            delivery_timeout_secs: 10,
            max_payload_size_bytes: 100_000_000,
            distribution_target: "test-channel".to_string(),
            max_concurrent_attempts: 1,
            drain_timeout_secs: 5,
            reclaim_after_secs: None,
        }
    }
}
