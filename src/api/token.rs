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


//! Bearer token lifecycle
//!
//! One live token per language partition. Lookups go through two tiers:
//!
//! 1. the store's own map (`local`)
//! 2. the shared [`ResponseCache`] under `token:{lang}` with the token TTL
//!
//! and fall back to minting. The cache TTL only limits how long a token is
//! shared; whether a token may be used is decided by its own `expires_at`
//! minus a five minute safety margin.
//!
//! # Minting
//! A mint generates a fresh [`DeviceIdentity`], posts `{"distinctId":null}`
//! to the bootstrap endpoint signed over `timestamp + body + deviceId +
//! androidId`, and expects `data.user.token` and `data.user.uid` back.
//! Mints for the same language are serialized; a second caller waiting on the
//! partition lock adopts the token the first one produced.

use crate::api::cache::{cache_key, ResponseCache};
use crate::api::client::interpret;
use crate::api::device::{device_headers, mask, DeviceIdentity, Signer};
use crate::api::models::BootstrapData;
use crate::api::retry::{RetryContext, RetryPolicy};
use crate::api::transport::{HttpMethod, Transport, UpstreamRequest};
use crate::config::{AppProfile, ClientConfig};
use crate::error::{DramaboxError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Bootstrap endpoint, relative to `/drama-box/`
pub const BOOTSTRAP_ENDPOINT: &str = "ap001/bootstrap";

/// Upstream token lifetime
pub const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Tokens this close to expiry are treated as already expired
pub const TOKEN_SAFETY_MARGIN_MINUTES: i64 = 5;

/// Bearer token bound to the device identity it was minted for
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(skip)]
    pub value: String,
    pub identity: DeviceIdentity,
    pub user_id: String,
    pub attribution: Option<Value>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Create a token issued at `issued_at` with the standard lifetime
    pub fn new(value: String, identity: DeviceIdentity, user_id: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            value,
            identity,
            user_id,
            attribution: None,
            issued_at,
            expires_at: issued_at + ChronoDuration::hours(TOKEN_LIFETIME_HOURS),
        }
    }

    /// Valid iff `expires_at > now + margin`; a token exactly at the margin is invalid
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + ChronoDuration::minutes(TOKEN_SAFETY_MARGIN_MINUTES)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Value of the `tn` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

/// Owner of all language-partitioned tokens
pub struct TokenStore {
    transport: Arc<dyn Transport>,
    signer: Signer,
    cache: Arc<ResponseCache>,
    local: RwLock<HashMap<String, Arc<Token>>>,
    mint_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    retry: RetryPolicy,
    base_url: String,
    profile: AppProfile,
    cache_ttl: Duration,
    minted: AtomicU64,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("base_url", &self.base_url)
            .field("minted", &self.minted.load(Ordering::Relaxed))
            .finish()
    }
}

impl TokenStore {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>, cache: Arc<ResponseCache>) -> Self {
        Self {
            transport,
            signer: Signer::new(&config.signing_secret),
            cache,
            local: RwLock::new(HashMap::new()),
            mint_guards: Mutex::new(HashMap::new()),
            retry: config.retry.clone(),
            base_url: config.base_url.clone(),
            profile: config.profile.clone(),
            cache_ttl: config.cache_ttls.token,
            minted: AtomicU64::new(0),
        }
    }

    /// Return a valid token for `lang`, minting one if necessary
    ///
    /// # Errors
    /// `TokenAcquisitionFailed` once the bootstrap call has failed terminally
    /// or exhausted its retries.
    pub async fn get_token(&self, lang: &str) -> Result<Arc<Token>> {
        if let Some(token) = self.lookup(lang).await {
            return Ok(token);
        }

        let guard = self.partition_guard(lang).await;
        let _minting = guard.lock().await;

        // Another caller may have minted while we waited
        if let Some(token) = self.lookup(lang).await {
            return Ok(token);
        }

        let token = Arc::new(self.mint(lang).await?);
        self.store(lang, token.clone()).await;
        Ok(token)
    }

    /// Drop the token for `lang` from both tiers; idempotent
    pub async fn invalidate(&self, lang: &str) {
        let removed = self.local.write().await.remove(lang).is_some();
        self.cache.remove(&token_cache_key(lang)).await;
        info!(lang, removed, "token invalidated");
    }

    /// Drop every partition
    pub async fn clear_all(&self) {
        self.local.write().await.clear();
        self.cache.remove_prefix(TOKEN_CACHE_PREFIX).await;
        debug!("all tokens cleared");
    }

    /// Tokens minted since start-up
    pub fn minted(&self) -> u64 {
        self.minted.load(Ordering::Relaxed)
    }

    async fn lookup(&self, lang: &str) -> Option<Arc<Token>> {
        if let Some(token) = self.local.read().await.get(lang) {
            if token.is_valid() {
                return Some(token.clone());
            }
        }

        let shared = self.cache.get::<Token>(&token_cache_key(lang)).await?;
        if !shared.is_valid() {
            return None;
        }
        debug!(lang, "adopting shared token");
        self.local.write().await.insert(lang.to_string(), shared.clone());
        Some(shared)
    }

    async fn store(&self, lang: &str, token: Arc<Token>) {
        self.local.write().await.insert(lang.to_string(), token.clone());
        self.cache.set(&token_cache_key(lang), token, self.cache_ttl).await;
    }

    async fn partition_guard(&self, lang: &str) -> Arc<Mutex<()>> {
        self.mint_guards
            .lock()
            .await
            .entry(lang.to_string())
            .or_default()
            .clone()
    }

    async fn mint(&self, lang: &str) -> Result<Token> {
        let mut ctx = RetryContext::new();

        loop {
            let err = match self.mint_once(lang).await {
                Ok(token) => {
                    self.minted.fetch_add(1, Ordering::Relaxed);
                    info!(
                        lang,
                        token = %mask(&token.value),
                        user_id = %token.user_id,
                        attempts = ctx.attempts(),
                        "token minted"
                    );
                    return Ok(token);
                }
                Err(err) => err,
            };

            // A bootstrap without token/uid is worth another identity
            let retryable = err.is_retryable()
                || matches!(
                    err,
                    DramaboxError::InvalidTokenResponse(_) | DramaboxError::UpstreamRejected { .. }
                );
            if err.forces_reauth() {
                self.invalidate(lang).await;
            }

            warn!(lang, attempt = ctx.attempt, error = %err, "token mint failed");
            match self.retry.schedule_if(&mut ctx, err, retryable) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    let attempts = ctx.attempts();
                    return Err(DramaboxError::TokenAcquisitionFailed {
                        language: lang.to_string(),
                        attempts,
                        source: Box::new(ctx.into_last_error(BOOTSTRAP_ENDPOINT)),
                    });
                }
            }
        }
    }

    async fn mint_once(&self, lang: &str) -> Result<Token> {
        let identity = DeviceIdentity::generate();
        let issued_at = Utc::now();
        let timestamp = issued_at.timestamp_millis().to_string();
        let body = json!({ "distinctId": null }).to_string();

        let url = Url::parse_with_params(
            &format!("{}/drama-box/{}", self.base_url, BOOTSTRAP_ENDPOINT),
            &[("timestamp", timestamp.as_str())],
        )
        .map_err(|e| DramaboxError::InvalidConfiguration(format!("base_url: {}", e)))?;

        let mut headers = device_headers(&self.profile, &identity, lang);
        headers.insert(
            "sn".to_string(),
            self.signer.sign_request(&timestamp, &body, &identity, None),
        );

        debug!(lang, device_id = %identity.device_id, "minting token");
        let response = self
            .transport
            .send(UpstreamRequest {
                method: HttpMethod::Post,
                url: url.to_string(),
                headers,
                body: Some(body),
            })
            .await?;

        let payload = interpret(BOOTSTRAP_ENDPOINT, response)?;
        let data: BootstrapData = match payload.get("data") {
            Some(data) if !data.is_null() => serde_json::from_value(data.clone())
                .map_err(|e| DramaboxError::InvalidTokenResponse(format!("malformed data: {}", e)))?,
            _ => return Err(DramaboxError::InvalidTokenResponse("missing data".to_string())),
        };

        let user = data.user.unwrap_or_default();
        let value = user
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| DramaboxError::InvalidTokenResponse("missing user token".to_string()))?;
        let user_id = user
            .uid
            .ok_or_else(|| DramaboxError::InvalidTokenResponse("missing user id".to_string()))?;

        let mut token = Token::new(value, identity, user_id, issued_at);
        token.attribution = data.attribution_pub_param;
        Ok(token)
    }
}

const TOKEN_CACHE_PREFIX: &str = "token:";

fn token_cache_key(lang: &str) -> String {
    cache_key("token", &[lang])
}
