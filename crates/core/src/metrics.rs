//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Fulfillment attempts (outcomes, duration, concurrency)
//! - Payload loading (downloads, bytes, duration)
//! - Relay deliveries
//! - Status store write failures

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Fulfillment Metrics
// =============================================================================

/// Fulfillment attempts total by outcome.
pub static ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("torrelay_attempts_total", "Total fulfillment attempts"),
        &["outcome"], // "delivered", "no_eligible_request", or an error kind
    )
    .unwrap()
});

/// Attempt duration in seconds (claimed attempts only).
pub static ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "torrelay_attempt_duration_seconds",
            "Duration of a fulfillment attempt from claim to final status write",
        )
        .buckets(vec![
            1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0,
        ]),
        &["outcome"],
    )
    .unwrap()
});

/// Attempts currently running.
pub static ATTEMPTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "torrelay_attempts_in_flight",
        "Number of fulfillment attempts currently running",
    )
    .unwrap()
});

/// Status writes that could not be persisted.
pub static STATUS_WRITE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "torrelay_status_write_errors_total",
        "Total status store writes that failed and left a request unrecorded",
    )
    .unwrap()
});

// =============================================================================
// Loader Metrics
// =============================================================================

/// Downloads started.
pub static DOWNLOADS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("torrelay_downloads_started_total", "Total downloads started").unwrap()
});

/// Bytes of completed downloads.
pub static BYTES_DOWNLOADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "torrelay_bytes_downloaded_total",
        "Total bytes of successfully downloaded payloads",
    )
    .unwrap()
});

/// Download duration by result.
pub static DOWNLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "torrelay_download_duration_seconds",
            "Time from transfer start to completion or abort",
        )
        .buckets(vec![
            10.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0,
        ]),
        &["result"], // "completed", "timeout", "cancelled", "failed"
    )
    .unwrap()
});

// =============================================================================
// Relay Metrics
// =============================================================================

/// Deliveries by result.
pub static DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("torrelay_deliveries_total", "Total relay deliveries"),
        &["result"], // "success", "failed", "timeout", "cancelled"
    )
    .unwrap()
});

/// Get all metrics for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Fulfillment
        Box::new(ATTEMPTS.clone()),
        Box::new(ATTEMPT_DURATION.clone()),
        Box::new(ATTEMPTS_IN_FLIGHT.clone()),
        Box::new(STATUS_WRITE_ERRORS.clone()),
        // Loader
        Box::new(DOWNLOADS_STARTED.clone()),
        Box::new(BYTES_DOWNLOADED.clone()),
        Box::new(DOWNLOAD_DURATION.clone()),
        // Relay
        Box::new(DELIVERIES.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_cleanly() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        ATTEMPTS.with_label_values(&["delivered"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "torrelay_attempts_total"));
    }
}
