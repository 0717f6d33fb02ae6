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


//! Wire transport
//!
//! The rest of the core talks to the upstream through the [`Transport`]
//! trait. Non-2xx statuses are returned as ordinary responses; only failures
//! where no response arrived at all (timeouts, DNS, refused or reset
//! connections) surface as errors.

use crate::error::{DramaboxError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP verb for an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Fully prepared upstream request
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    /// Absolute URL including query string
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl UpstreamRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Raw upstream response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the transport with connection pooling and a request timeout
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the TLS backend cannot be initialized
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| DramaboxError::InvalidConfiguration(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DramaboxError::InvalidConfiguration(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| DramaboxError::invalid_response(format!("Invalid header value for '{}': {}", name, e), None))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let headers = Self::header_map(&request.headers)?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        }
        .headers(headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(UpstreamResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_rejects_bad_names() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            HttpTransport::header_map(&headers),
            Err(DramaboxError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_bad_header_value_is_not_a_caller_error() {
        let mut headers = BTreeMap::new();
        headers.insert("userid".to_string(), "12\n34".to_string());

        let err = HttpTransport::header_map(&headers).unwrap_err();
        assert!(matches!(err, DramaboxError::InvalidResponse { .. }));
        assert_ne!(err.category(), "validation");
    }

    #[test]
    fn test_header_map_accepts_upstream_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("device-id".to_string(), "abc".to_string());
        headers.insert("tn".to_string(), "Bearer xyz".to_string());
        let map = HttpTransport::header_map(&headers).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("tn").unwrap(), "Bearer xyz");
    }

    #[test]
    fn test_response_success_range() {
        assert!(UpstreamResponse { status: 204, body: String::new() }.is_success());
        assert!(!UpstreamResponse { status: 302, body: String::new() }.is_success());
    }
}
