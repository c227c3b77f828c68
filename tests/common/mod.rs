//! Shared test fixtures: an app wired to a temp ledger, in-memory
//! storage, the stub document processor and webhook-capable providers.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use faxbot::api::models::Backend;
use faxbot::api::state::AppState;
use faxbot::api::build_router;
use faxbot::config::Config;
use faxbot::convert::StubProcessor;
use faxbot::ledger::FaxStore;
use faxbot::providers::{DisabledProvider, PhaxioProvider, ProviderRegistry, SinchProvider};
use faxbot::storage::StorageClient;

pub const ADMIN_KEY: &str = "test-bootstrap-admin-key";
pub const PHAXIO_CALLBACK_TOKEN: &str = "phaxio-callback-secret";
pub const INTERNAL_SECRET: &str = "s3cr3t";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _temp: TempDir,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.bootstrap_key = Some(ADMIN_KEY.to_string());
    config.server.public_url = "https://fax.example.com".to_string();
    config.inbound.enabled = true;
    config.inbound.internal_secret = Some(INTERNAL_SECRET.to_string());
    config.phaxio.api_key = Some("phx-key".to_string());
    config.phaxio.api_secret = Some("phx-secret".to_string());
    config.phaxio.callback_token = Some(PHAXIO_CALLBACK_TOKEN.to_string());
    config.sinch.project_id = Some("proj".to_string());
    config.sinch.api_key = Some("sinch-key".to_string());
    config.sinch.api_secret = Some("sinch-secret".to_string());
    config.sinch.basic_user = Some("hook".to_string());
    config.sinch.basic_pass = Some("hookpass".to_string());
    config
}

pub fn build_test_app_with(config: Config) -> TestApp {
    build_test_app_with_active(config, Backend::Disabled)
}

pub fn build_test_app_with_active(config: Config, active: Backend) -> TestApp {
    build_test_app_custom(config, active, Vec::new())
}

pub fn build_test_app_custom(
    config: Config,
    active: Backend,
    extra: Vec<Arc<dyn faxbot::providers::OutboundProvider>>,
) -> TestApp {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = FaxStore::open(temp.path().join("ledger")).expect("Failed to open test ledger");
    let storage = StorageClient::in_memory();

    let mut providers = ProviderRegistry::new(active);
    providers.register(Arc::new(DisabledProvider));
    providers.register(Arc::new(PhaxioProvider::new(&config.phaxio).unwrap()));
    providers.register(Arc::new(SinchProvider::new(&config.sinch).unwrap()));
    for provider in extra {
        providers.register(provider);
    }

    let state = AppState::new(config, store, storage, Arc::new(StubProcessor), providers);
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        _temp: temp,
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub const BOUNDARY: &str = "faxbot-test-boundary";

/// Hand-rolled multipart body with a `to` field and one file part.
pub fn multipart_body(to: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"to\"\r\n\r\n{to}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn fax_request(api_key: Option<&str>, to: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/fax")
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    builder
        .body(Body::from(multipart_body(to, filename, content_type, bytes)))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub fn get_request(uri: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).method("GET");
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, api_key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}
