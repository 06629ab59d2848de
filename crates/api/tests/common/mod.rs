#![allow(dead_code)]

//! Shared helpers for API integration tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use easel_api::auth::AuthConfig;
use easel_api::config::ServerConfig;
use easel_api::router::build_app_router;
use easel_api::state::AppState;
use easel_engine::{DispatchConfig, Dispatcher};
use easel_storage::{ResultRecorder, TaskStore, UserRegistry};

/// Build a test `ServerConfig` with auth enforcement on and a known secret.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        task_wait_secs: 2,
        auth: AuthConfig {
            enforce: true,
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
        },
    }
}

/// A valid client token for the test secret.
pub fn client_token() -> String {
    easel_api::auth::issue_token("tester", 3600, &test_config().auth)
        .expect("token generation should succeed")
}

/// Everything a test needs to drive the app and its engine directly.
pub struct TestApp {
    pub app: Router,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<TaskStore>,
}

/// Build the full application router with the production middleware stack
/// and a fast-retry engine config, so tests never sit out real delays.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

/// Same as [`build_test_app`] but with a caller-chosen server config.
pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let dispatcher = Dispatcher::start(DispatchConfig {
        schedule_retry_delay: Duration::from_millis(10),
        offline_grace: Duration::from_millis(200),
        ..DispatchConfig::default()
    });
    let store = Arc::new(TaskStore::new());
    let users = Arc::new(UserRegistry::new());
    tokio::spawn(ResultRecorder::new(Arc::clone(&store)).run(dispatcher.subscribe()));

    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        store: Arc::clone(&store),
        users,
        config: Arc::new(config.clone()),
    };

    TestApp {
        app: build_app_router(state, &config),
        dispatcher,
        store,
    }
}

/// POST a JSON body and return the response.
pub async fn post_json(app: Router, path: &str, body: Value) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build"),
    )
    .await
    .expect("request should not fail")
}

/// GET a path and return the response.
pub async fn send_get(app: Router, path: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("request should build"),
    )
    .await
    .expect("request should not fail")
}

/// DELETE a path and return the response.
pub async fn send_delete(app: Router, path: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())
            .expect("request should build"),
    )
    .await
    .expect("request should not fail")
}

/// Read and parse a JSON response body.
pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}
