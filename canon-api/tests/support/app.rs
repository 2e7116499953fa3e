#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use canon_api::{create_api_router, ApiConfig, AppState};
use canon_core::FeedConfig;
use canon_storage::{ChangeFeed, EntityStore, InMemoryChangeFeed, InMemoryEntityStore};
use canon_test_utils::{fixtures, FlakyStore};
use tower::ServiceExt;

/// Router plus handles on the pieces tests poke at directly.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<FlakyStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
    pub text: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Two partitions, short retention, small pages and millisecond retries.
pub fn test_config() -> ApiConfig {
    ApiConfig {
        feed: FeedConfig {
            partition_count: 2,
            retention_per_partition: 4,
            default_page_size: 2,
            max_page_size: 10,
        },
        consumer: fixtures::fast_consumer(),
        retry: fixtures::fast_retry(),
        ..ApiConfig::default()
    }
}

pub fn test_app() -> TestApp {
    test_app_with(test_config())
}

pub fn test_app_with(config: ApiConfig) -> TestApp {
    let feed: Arc<dyn ChangeFeed> = Arc::new(InMemoryChangeFeed::new(&config.feed));
    let inner: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new(feed.clone()));
    let store = Arc::new(FlakyStore::new(inner));
    let state = AppState::from_parts(&config, feed, store.clone())
        .expect("state construction should succeed");
    let router =
        create_api_router(state.clone(), &config).expect("router construction should succeed");
    TestApp {
        router,
        state,
        store,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        TestResponse {
            status,
            headers,
            body,
            text,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(empty(Method::GET, uri)).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send(empty(Method::DELETE, uri)).await
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.send(json(Method::POST, uri, body)).await
    }

    pub async fn patch(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.send(json(Method::PATCH, uri, body)).await
    }

    /// Create an asset and return its JSON representation.
    pub async fn create_asset(&self, name: &str) -> serde_json::Value {
        let created = self
            .post(
                "/v1/entities",
                serde_json::json!({ "kind": "asset", "display_name": name }),
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{}", created.text);
        created.body
    }
}

pub fn empty(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub fn json(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}
