// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Upstream client for the Dramabox API
//!
//! This module provides the request pipeline every operation goes through:
//! - Device-spoofed, signed requests against the primary surface
//! - Minimal unsigned requests against the secondary (stream) surface
//! - Soft-failure detection (`success: false` inside an HTTP 200)
//! - Retry with exponential backoff and forced token rotation
//!
//! # Architecture
//!
//! ## Client Structure
//! `DramaboxClient` is cheap to clone. It holds the configuration, the
//! [`Transport`] and an `Arc<SessionContext>`: the process-wide cache and
//! token store. All clones share that context, and nothing in the crate keeps
//! state outside of it.
//!
//! ## Request Loop
//! [`DramaboxClient::request`] runs an explicit bounded loop:
//! - soft failure on the first attempt: invalidate the token, re-mint, go
//!   again immediately; a second soft failure is terminal
//! - 502/503: invalidate the token, then back off like any retryable error
//! - retryable errors back off `1s, 2s, 4s` (capped at 10s)
//! - at most `MAX_RETRIES + 1` attempts in total

use crate::api::cache::ResponseCache;
use crate::api::device::{device_headers, Signer};
use crate::api::retry::RetryContext;
use crate::api::token::{Token, TokenStore};
use crate::api::transport::{HttpMethod, HttpTransport, Transport, UpstreamRequest, UpstreamResponse};
use crate::config::ClientConfig;
use crate::error::{DramaboxError, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Longest response snippet kept on an error
const ERROR_SNIPPET_CHARS: usize = 200;

/// How a request authenticates against the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Primary surface: bearer token, device headers and signature
    Signed,
    /// Secondary surface: no token, minimal headers
    Anonymous,
}

/// Process-wide mutable state shared by every clone of the client
#[derive(Debug)]
pub struct SessionContext {
    pub cache: Arc<ResponseCache>,
    pub tokens: TokenStore,
}

/// Dramabox API client
#[derive(Clone)]
pub struct DramaboxClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    signer: Signer,
    context: Arc<SessionContext>,
}

impl std::fmt::Debug for DramaboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DramaboxClient")
            .field("base_url", &self.config.base_url)
            .field("stream_base_url", &self.config.stream_base_url)
            .field("context", &self.context)
            .finish()
    }
}

impl DramaboxClient {
    /// Create a client talking to the real upstream over HTTP
    ///
    /// # Arguments
    /// * `config` - Client configuration
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the configuration does not validate or
    /// the HTTP client cannot be built
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client on top of an arbitrary transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(ResponseCache::with_capacity(config.cache_capacity));
        let tokens = TokenStore::new(&config, transport.clone(), cache.clone());

        Ok(Self {
            signer: Signer::new(&config.signing_secret),
            config: Arc::new(config),
            transport,
            context: Arc::new(SessionContext { cache, tokens }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Tear down shared state: every cache entry and every token partition
    pub async fn shutdown(&self) {
        self.context.tokens.clear_all().await;
        self.context.cache.clear().await;
        debug!("client state cleared");
    }

    /// Issue one logical upstream call
    ///
    /// # Arguments
    /// * `endpoint` - Path below `/drama-box/` (signed) or below the stream
    ///   base URL (anonymous)
    /// * `payload` - JSON body for POST, query parameters for GET
    /// * `auth` - Which upstream surface to use
    /// * `method` - HTTP verb
    /// * `lang` - Language partition
    ///
    /// # Returns
    /// The full decoded upstream envelope
    ///
    /// # Errors
    /// The classified final error; exhaustion is wrapped in `RetriesExhausted`
    pub async fn request(
        &self,
        endpoint: &str,
        payload: &Value,
        auth: AuthMode,
        method: HttpMethod,
        lang: &str,
    ) -> Result<Value> {
        let mut ctx = RetryContext::new();

        loop {
            let err = match self.send_once(endpoint, payload, auth, method, lang).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if let DramaboxError::UpstreamRejected { .. } = err {
                if auth == AuthMode::Signed && ctx.attempt == 0 {
                    warn!(endpoint, lang, error = %err, "soft failure, rotating token");
                    self.context.tokens.invalidate(lang).await;
                    ctx.advance(err);
                    continue;
                }
                return Err(err);
            }

            if auth == AuthMode::Signed && err.forces_reauth() {
                self.context.tokens.invalidate(lang).await;
            }

            let attempt = ctx.attempt;
            match self.config.retry.schedule(&mut ctx, err) {
                Some(delay) => {
                    warn!(endpoint, attempt, delay_ms = delay.as_millis() as u64, "retrying upstream call");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(ctx.into_error(endpoint)),
            }
        }
    }

    /// Single attempt, no retries
    pub(crate) async fn send_once(
        &self,
        endpoint: &str,
        payload: &Value,
        auth: AuthMode,
        method: HttpMethod,
        lang: &str,
    ) -> Result<Value> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let body = match method {
            HttpMethod::Post => serde_json::to_string(payload)?,
            HttpMethod::Get => String::new(),
        };

        let mut params = vec![("timestamp".to_string(), timestamp.clone())];
        if method == HttpMethod::Get {
            params.extend(query_params(payload));
        }

        let (url, headers) = match auth {
            AuthMode::Signed => {
                let token = self.context.tokens.get_token(lang).await?;
                let url = endpoint_url(&format!("{}/drama-box", self.config.base_url), endpoint, &params)?;
                (url, self.signed_headers(&timestamp, &body, &token, lang))
            }
            AuthMode::Anonymous => {
                let url = endpoint_url(&self.config.stream_base_url, endpoint, &params)?;
                (url, self.anonymous_headers(lang))
            }
        };

        debug!(endpoint, ?auth, lang, "upstream request");
        let response = self
            .transport
            .send(UpstreamRequest {
                method,
                url: url.to_string(),
                headers,
                body: (method == HttpMethod::Post).then_some(body),
            })
            .await?;

        interpret(endpoint, response)
    }

    /// Full header set for a signed request made with `token`
    pub(crate) fn signed_headers(
        &self,
        timestamp: &str,
        body: &str,
        token: &Token,
        lang: &str,
    ) -> BTreeMap<String, String> {
        let bearer = token.bearer();
        let mut headers = device_headers(&self.config.profile, &token.identity, lang);
        headers.insert(
            "sn".to_string(),
            self.signer.sign_request(timestamp, body, &token.identity, Some(&bearer)),
        );
        headers.insert("userid".to_string(), token.user_id.clone());
        headers.insert("tn".to_string(), bearer);
        headers
    }

    fn anonymous_headers(&self, lang: &str) -> BTreeMap<String, String> {
        [
            ("user-agent", self.config.profile.user_agent.as_str()),
            ("content-type", "application/json; charset=UTF-8"),
            ("accept", "application/json"),
            ("language", lang),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
    }

    /// Signed POST returning the decoded `data` object, `None` when absent
    pub(crate) async fn fetch_data<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &Value,
        lang: &str,
    ) -> Result<Option<T>> {
        let envelope = self
            .request(endpoint, payload, AuthMode::Signed, HttpMethod::Post, lang)
            .await?;
        decode_data(endpoint, envelope)
    }

    /// Serve `key` from the cache or compute, store and return it
    pub(crate) async fn cached<T, F>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.context.cache.get::<T>(key).await {
            return Ok(hit);
        }

        let value = Arc::new(fetch.await?);
        self.context.cache.set(key, value.clone(), ttl).await;
        Ok(value)
    }
}

/// Turn a raw upstream response into a decoded envelope
///
/// Non-2xx becomes `UpstreamStatus`, undecodable bodies `InvalidResponse`,
/// and `success: false` becomes `UpstreamRejected`.
pub(crate) fn interpret(endpoint: &str, response: UpstreamResponse) -> Result<Value> {
    if !response.is_success() {
        return Err(DramaboxError::upstream_status(
            response.status,
            endpoint,
            snippet(&response.body),
        ));
    }

    let envelope: Value = serde_json::from_str(&response.body).map_err(|e| {
        DramaboxError::invalid_response(format!("{}: {}", endpoint, e), Some(snippet(&response.body)))
    })?;

    if envelope.get("success").and_then(Value::as_bool) == Some(false) {
        let message = envelope
            .get("message")
            .or_else(|| envelope.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or("success=false")
            .to_string();
        return Err(DramaboxError::rejected(endpoint, message));
    }

    Ok(envelope)
}

/// Decode the `data` member of an envelope
pub(crate) fn decode_data<T: DeserializeOwned>(endpoint: &str, mut envelope: Value) -> Result<Option<T>> {
    match envelope.get_mut("data").map(Value::take) {
        None | Some(Value::Null) => Ok(None),
        Some(data) => serde_json::from_value(data)
            .map(Some)
            .map_err(|e| DramaboxError::invalid_response(format!("{} data: {}", endpoint, e), None)),
    }
}

fn endpoint_url(base: &str, endpoint: &str, params: &[(String, String)]) -> Result<Url> {
    let raw = format!("{}/{}", base, endpoint.trim_start_matches('/'));
    Url::parse_with_params(&raw, params)
        .map_err(|e| DramaboxError::InvalidConfiguration(format!("URL '{}': {}", raw, e)))
}

/// Scalar members of a JSON object as query parameters
fn query_params(payload: &Value) -> Vec<(String, String)> {
    let Some(map) = payload.as_object() else {
        return Vec::new();
    };

    map.iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect()
}

fn snippet(body: &str) -> String {
    body.chars().take(ERROR_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{
        bootstrap_response, data_response, is_bootstrap, json_response, request_body, status_response, test_config,
        MockTransport,
    };
    use crate::api::token::BOOTSTRAP_ENDPOINT;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bootstrap answers with numbered tokens; other calls go to `handler`
    fn transport_with<F>(handler: F) -> Arc<MockTransport>
    where
        F: Fn(usize, &UpstreamRequest) -> crate::error::Result<UpstreamResponse> + Send + Sync + 'static,
    {
        let mints = AtomicUsize::new(0);
        let calls = AtomicUsize::new(0);
        MockTransport::new(move |request| {
            if is_bootstrap(request) {
                bootstrap_response(mints.fetch_add(1, Ordering::SeqCst) + 1)
            } else {
                handler(calls.fetch_add(1, Ordering::SeqCst), request)
            }
        })
    }

    fn client_with(transport: Arc<MockTransport>) -> DramaboxClient {
        DramaboxClient::with_transport(test_config(), transport).unwrap()
    }

    #[tokio::test]
    async fn test_signed_request_headers() {
        let transport = transport_with(|_, _| data_response(json!({"ok": 1})));
        let client = client_with(transport.clone());

        let payload = json!({"pageNo": 1});
        client
            .request("he001/theater", &payload, AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap();

        let request = transport
            .requests()
            .into_iter()
            .find(|request| !is_bootstrap(request))
            .unwrap();
        let token = client.context().tokens.get_token("en").await.unwrap();

        assert!(request.url.starts_with("http://upstream.test/drama-box/he001/theater?timestamp="));
        assert_eq!(request.header("tn"), Some("Bearer token-1"));
        assert_eq!(request.header("userid"), Some("1001"));
        assert_eq!(request.header("android-id"), Some(token.identity.android_id.as_str()));
        assert_eq!(request_body(&request), payload);

        let timestamp = request.url.split("timestamp=").nth(1).unwrap();
        let expected = Signer::new("test-secret").sign_request(
            timestamp,
            request.body.as_deref().unwrap(),
            &token.identity,
            Some("Bearer token-1"),
        );
        assert_eq!(request.header("sn"), Some(expected.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failure_rotates_token_once() {
        let transport = transport_with(|call, _| {
            if call == 0 {
                json_response(json!({"success": false, "message": "session expired"}))
            } else {
                data_response(json!({"ok": true}))
            }
        });
        let client = client_with(transport.clone());

        let started = tokio::time::Instant::now();
        let envelope = client
            .request("he001/vip", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap();

        assert_eq!(envelope["data"]["ok"], json!(true));
        assert_eq!(transport.calls_to(BOOTSTRAP_ENDPOINT), 2);
        assert_eq!(transport.calls_to("he001/vip"), 2);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let tokens: Vec<String> = transport
            .requests()
            .iter()
            .filter(|request| !is_bootstrap(request))
            .filter_map(|request| request.header("tn").map(str::to_string))
            .collect();
        assert_eq!(tokens, vec!["Bearer token-1".to_string(), "Bearer token-2".to_string()]);
    }

    #[tokio::test]
    async fn test_second_soft_failure_is_terminal() {
        let transport = transport_with(|_, _| json_response(json!({"success": false, "msg": "denied"})));
        let client = client_with(transport.clone());

        let err = client
            .request("he001/vip", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap_err();

        match err {
            DramaboxError::UpstreamRejected { endpoint, message } => {
                assert_eq!(endpoint, "he001/vip");
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.calls_to("he001/vip"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_gateway_invalidates_and_backs_off() {
        let transport = transport_with(|call, _| if call == 0 { status_response(502) } else { data_response(json!([])) });
        let client = client_with(transport.clone());

        let started = tokio::time::Instant::now();
        client
            .request("he001/theater", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap();

        assert_eq!(transport.calls_to(BOOTSTRAP_ENDPOINT), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_keeps_token() {
        let transport = transport_with(|call, _| if call == 0 { status_response(500) } else { data_response(json!([])) });
        let client = client_with(transport.clone());

        client
            .request("he001/theater", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap();
        assert_eq!(transport.calls_to(BOOTSTRAP_ENDPOINT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let transport = transport_with(|_, _| status_response(504));
        let client = client_with(transport.clone());

        let err = client
            .request("search/search", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap_err();

        match err {
            DramaboxError::RetriesExhausted { operation, attempts, source } => {
                assert_eq!(operation, "search/search");
                assert_eq!(attempts, 4);
                assert_eq!(source.status_code(), Some(504));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.calls_to("search/search"), 4);
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let transport = transport_with(|_, _| status_response(404));
        let client = client_with(transport.clone());

        let err = client
            .request("he001/theater", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(transport.calls_to("he001/theater"), 1);
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let transport = transport_with(|_, _| {
            Ok(UpstreamResponse {
                status: 200,
                body: "<html>maintenance</html>".to_string(),
            })
        });
        let client = client_with(transport);

        let err = client
            .request("he001/theater", &json!({}), AuthMode::Signed, HttpMethod::Post, "en")
            .await
            .unwrap_err();
        match err {
            DramaboxError::InvalidResponse { response_body, .. } => {
                assert_eq!(response_body.as_deref(), Some("<html>maintenance</html>"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_anonymous_get_skips_token() {
        let transport = transport_with(|_, _| data_response(json!({"chapterId": 1})));
        let client = client_with(transport.clone());

        client
            .request(
                "webfic/book/chapter",
                &json!({"bookId": "42", "index": 3}),
                AuthMode::Anonymous,
                HttpMethod::Get,
                "en",
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.url.starts_with("http://stream.test/webfic/book/chapter?timestamp="));
        assert!(request.url.contains("bookId=42"));
        assert!(request.url.contains("index=3"));
        assert!(request.body.is_none());
        assert!(request.header("tn").is_none());
        assert!(request.header("sn").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_clears_state() {
        let transport = transport_with(|_, _| data_response(json!({})));
        let client = client_with(transport.clone());

        client.context().tokens.get_token("en").await.unwrap();
        let _ = client
            .cached("k", Duration::from_secs(60), async { Ok(1u32) })
            .await
            .unwrap();
        client.shutdown().await;

        assert_eq!(client.context().cache.stats().await.entries, 0);
        client.context().tokens.get_token("en").await.unwrap();
        assert_eq!(transport.calls_to(BOOTSTRAP_ENDPOINT), 2);
    }

    #[test]
    fn test_decode_data_variants() {
        let missing: Option<Value> = decode_data("x", json!({"success": true})).unwrap();
        assert!(missing.is_none());

        let null: Option<Value> = decode_data("x", json!({"data": null})).unwrap();
        assert!(null.is_none());

        let typed: Option<Vec<u32>> = decode_data("x", json!({"data": [1, 2]})).unwrap();
        assert_eq!(typed, Some(vec![1, 2]));

        let bad = decode_data::<Vec<u32>>("x", json!({"data": "nope"}));
        assert!(matches!(bad, Err(DramaboxError::InvalidResponse { .. })));
    }

    #[test]
    fn test_interpret_truncates_error_body() {
        let response = UpstreamResponse {
            status: 500,
            body: "x".repeat(1000),
        };
        match interpret("x", response) {
            Err(DramaboxError::UpstreamStatus { message, .. }) => assert_eq!(message.len(), 200),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
