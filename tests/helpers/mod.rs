//! Test harness for endpoint integration tests.
//!
//! Seeds an in-memory object store with H-file images built by the writer in
//! [`hfile`], then drives the real axum router with `tower::ServiceExt::
//! oneshot` — no sockets, no external services.

#![allow(dead_code)]

pub mod fixtures;
pub mod hfile;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

use hview_server::api;
use hview_server::store::MemoryStore;
use hview_server::types::AppContext;

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub ctx: AppContext,
    router: Router,
}

impl TestHarness {
    /// Empty store.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = AppContext::new(store.clone());
        let router = api::router(ctx.clone());
        Self { store, ctx, router }
    }

    /// Store seeded with `sample.hfv` (see [`fixtures::sample_file`]).
    pub fn with_sample() -> Self {
        let harness = Self::new();
        harness.store.put("sample.hfv", fixtures::sample_file());
        harness
    }

    pub fn put(&self, key: &str, image: Vec<u8>) {
        self.store.put(key, image);
    }

    /// GET a URI and parse the JSON body.
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// GET a URI and return the raw body plus content type.
    pub async fn get_raw(&self, uri: &str) -> (StatusCode, String, String) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned(), content_type)
    }

    /// POST a URI with an empty body and parse the JSON response.
    pub async fn post(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

/// Count the scalar leaves of a nested JSON array.
pub fn flat_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(flat_len).sum(),
        _ => 1,
    }
}
