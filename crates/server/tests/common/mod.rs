//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router backed by an orchestrator whose models,
//! decoder, encoder and object store are the core crate's mocks.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use avatar_prep_core::{
    testing::{
        MockLandmarkModel, MockModelHub, MockModelLoader, MockObjectStore, MockVideoDecoder,
        MockVideoEncoder,
    },
    ArtifactStore, Config, ModelRegistry, OrchestratorConfig, PipelineOrchestrator, RetryConfig,
};
use avatar_prep_server::{api::create_router, state::AppState};

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///     let response = fixture.post("/api/v1/jobs", json!({"video": {"path": "/a.mp4"}})).await;
///     assert_eq!(response.status, StatusCode::ACCEPTED);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub orchestrator: Option<Arc<PipelineOrchestrator>>,
    pub store: Arc<MockObjectStore>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Build an orchestrator; without one the job endpoints answer 503
    pub enable_pipeline: bool,
    /// Per-call landmark latency, to keep jobs in flight
    pub landmark_delay: Option<Duration>,
    pub max_in_flight_jobs: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enable_pipeline: true,
            landmark_delay: None,
            max_in_flight_jobs: 2,
        }
    }
}

impl TestConfig {
    /// Config without an orchestrator.
    pub fn without_pipeline() -> Self {
        Self {
            enable_pipeline: false,
            ..Default::default()
        }
    }

    /// Config whose jobs stay in landmarking for a while.
    pub fn slow() -> Self {
        Self {
            landmark_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let store = Arc::new(MockObjectStore::new());

        let orchestrator = if test_config.enable_pipeline {
            let mut landmarks = MockLandmarkModel::new(68);
            if let Some(delay) = test_config.landmark_delay {
                landmarks = landmarks.with_delay(delay);
            }
            let loader = MockModelLoader::new().with_landmark_model(Arc::new(landmarks));
            let registry =
                ModelRegistry::new(Arc::new(loader)).with_hub(Arc::new(MockModelHub::new()));
            let config = OrchestratorConfig::default()
                .with_max_in_flight_jobs(test_config.max_in_flight_jobs)
                .with_stage_retry(RetryConfig::immediate(3));

            let orchestrator = PipelineOrchestrator::new(
                config,
                Arc::new(registry),
                Arc::new(MockVideoDecoder::new(4.0, 30.0)),
                ArtifactStore::new(store.clone(), RetryConfig::immediate(3)),
                Arc::new(MockVideoEncoder::new()),
            );
            orchestrator.start().await;
            Some(Arc::new(orchestrator))
        } else {
            None
        };

        let state = Arc::new(AppState::new(Config::default(), orchestrator.clone()));
        let router = create_router(state);

        Self {
            router,
            orchestrator,
            store,
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

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Polls the job until it reaches a terminal state.
    pub async fn wait_for_job(&self, id: &str) -> TestResponse {
        for _ in 0..500 {
            let response = self.get(&format!("/api/v1/jobs/{}", id)).await;
            let state = response.body["state"]["type"].as_str().unwrap_or_default();
            if state == "completed" || state == "failed" {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish in time", id);
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
