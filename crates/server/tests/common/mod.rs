//! Common test utilities for router tests with mocks.
//!
//! This module provides a test fixture that builds the router in-process
//! over an in-memory store, a mock fetcher and a local-mount target in a
//! temporary directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mediarelay_core::{
    testing::{fixtures, MockFetcher},
    Engine, ItemStore, SqliteItemStore, StrategySet,
};

/// Test fixture for router tests with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_item_creation() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/items", json!({
///         "title": "Dune",
///         "url": "http://cdn/dune.mkv",
///         "quality": "1080p"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub engine: Arc<Engine>,
    /// Mock fetcher - control acquisitions
    pub fetcher: Arc<MockFetcher>,
    /// Temporary directory holding staging and the target root
    pub temp_dir: TempDir,
    pub target_dir: PathBuf,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture with the admission loop stopped: submitted items stay queued.
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Fixture with the admission loop running.
    pub async fn started() -> Self {
        Self::build(true).await
    }

    async fn build(start: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let staging_dir = temp_dir.path().join("staging");
        let target_dir = temp_dir.path().join("target");
        std::fs::create_dir_all(&target_dir).expect("Failed to create target dir");

        let mut config = fixtures::config(&staging_dir, &target_dir);
        config.database.path = temp_dir.path().join("test.db");

        let store: Arc<dyn ItemStore> = Arc::new(
            SqliteItemStore::new(&config.database.path).expect("Failed to create item store"),
        );
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_payload(4096, 1024).await;
        fetcher.set_chunk_delay(Duration::from_millis(1)).await;

        let engine = Arc::new(Engine::new(
            &config,
            store,
            Arc::clone(&fetcher) as Arc<dyn mediarelay_core::Fetcher>,
            StrategySet::standard(&config.transfer),
        ));
        if start {
            engine.start().await;
        }

        let state = Arc::new(mediarelay_server::state::AppState::new(
            config,
            Arc::clone(&engine),
        ));
        let router = mediarelay_server::api::create_router(state);

        Self {
            router,
            engine,
            fetcher,
            temp_dir,
            target_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    pub async fn post_text(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "text/plain")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await.0
    }

    /// Raw response body, for non-JSON endpoints.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let (response, bytes) = self.send(request).await;
        (response.status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll an item until it reaches `state`.
    pub async fn wait_for_state(&self, id: &str, state: &str, timeout: Duration) -> TestResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(&format!("/api/v1/items/{}", id)).await;
            if response.body["state"] == state || tokio::time::Instant::now() >= deadline {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await.0
    }

    async fn send(&self, request: Request<Body>) -> (TestResponse, Vec<u8>) {
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

        (TestResponse { status, body }, body_bytes.to_vec())
    }
}

/// Helper to assert response status with helpful error message.
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
