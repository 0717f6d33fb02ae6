//! In-memory transport and fixtures for unit tests

use crate::api::token::BOOTSTRAP_ENDPOINT;
use crate::api::transport::{Transport, UpstreamRequest, UpstreamResponse};
use crate::config::{ClientConfig, PagerConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Box<dyn Fn(&UpstreamRequest) -> Result<UpstreamResponse> + Send + Sync>;

/// Transport answering from a closure and recording every request
pub(crate) struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl MockTransport {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&UpstreamRequest) -> Result<UpstreamResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose URL contains `fragment`
    pub(crate) fn calls_to(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

pub(crate) fn is_bootstrap(request: &UpstreamRequest) -> bool {
    request.url.contains(BOOTSTRAP_ENDPOINT)
}

pub(crate) fn json_response(value: Value) -> Result<UpstreamResponse> {
    Ok(UpstreamResponse {
        status: 200,
        body: value.to_string(),
    })
}

pub(crate) fn status_response(status: u16) -> Result<UpstreamResponse> {
    Ok(UpstreamResponse {
        status,
        body: "upstream unavailable".to_string(),
    })
}

/// Successful bootstrap payload carrying `token-{n}`
pub(crate) fn bootstrap_response(n: usize) -> Result<UpstreamResponse> {
    json_response(json!({
        "success": true,
        "data": {
            "user": {"token": format!("token-{}", n), "uid": 1000 + n},
            "attributionPubParam": {"channel": "test"}
        }
    }))
}

pub(crate) fn data_response(data: Value) -> Result<UpstreamResponse> {
    json_response(json!({"success": true, "status": 0, "data": data}))
}

pub(crate) fn request_body(request: &UpstreamRequest) -> Value {
    request
        .body
        .as_deref()
        .and_then(|body| serde_json::from_str(body).ok())
        .unwrap_or(Value::Null)
}

/// Configuration pointing at fake hosts with fast pager pacing
pub(crate) fn test_config() -> ClientConfig {
    let pager = PagerConfig {
        pacing_delay: Duration::from_millis(10),
        recovery_delay: Duration::from_millis(20),
        ..PagerConfig::default()
    };

    ClientConfig::builder()
        .base_url("http://upstream.test")
        .stream_base_url("http://stream.test")
        .signing_secret("test-secret")
        .pager(pager)
        .build()
}
