//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! over a temporary database, optionally with a fulfillment scheduler
//! driven by mock loader and relay implementations.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use torrelay_core::{
    testing::{MockPayloadLoader, MockRelayUploader},
    Config, DatabaseConfig, FulfillmentController, FulfillmentScheduler, RequestStore,
    ServerConfig, SqliteRequestStore,
};
use torrelay_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use torrelay_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/requests", json!({
///         "locator": fixtures::magnet(1),
///         "requester_id": "alice"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Store shared with the router, for seeding and inspection
    pub store: Arc<SqliteRequestStore>,
    /// Mock loader used by the scheduler
    pub loader: Arc<MockPayloadLoader>,
    /// Mock relay used by the scheduler
    pub relay: Arc<MockRelayUploader>,
    /// Scheduler, when enabled
    pub scheduler: Option<Arc<FulfillmentScheduler>>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture without a scheduler.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Fixture with an idle scheduler wired to the mocks.
    pub fn with_scheduler() -> Self {
        Self::build(true)
    }

    fn build(enable_scheduler: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let store =
            Arc::new(SqliteRequestStore::new(&db_path).expect("Failed to create request store"));
        let loader = Arc::new(MockPayloadLoader::with_download_dir(temp_dir.path()));
        let relay = Arc::new(MockRelayUploader::new());

        let fulfillment = fixtures::fulfillment_config();
        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            fulfillment: torrelay_core::FulfillmentConfig {
                enabled: enable_scheduler,
                ..fulfillment.clone()
            },
            ..Default::default()
        };

        let scheduler = enable_scheduler.then(|| {
            let controller = FulfillmentController::new(
                fulfillment,
                Arc::clone(&store) as Arc<dyn RequestStore>,
                loader.clone(),
                relay.clone(),
            );
            Arc::new(FulfillmentScheduler::new(
                Arc::new(controller),
                &CancellationToken::new(),
            ))
        });

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&store) as Arc<dyn RequestStore>,
            scheduler.clone(),
        ));
        let router = create_router(state);

        Self {
            router,
            store,
            loader,
            relay,
            scheduler,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a GET request and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
