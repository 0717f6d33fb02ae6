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


//! Client configuration
//!
//! All tunables of the core live here: upstream base URLs, the spoofed Android
//! client profile, per-operation cache TTLs, retry policy and the chapter pager
//! heuristics. Every value has a default that matches the upstream Android app;
//! `ClientConfig::from_env()` lets the binary override them with `DRAMABOX_*`
//! environment variables.

use crate::api::cache::DEFAULT_MAX_ENTRIES;
use crate::api::retry::RetryPolicy;
use crate::api::validate;
use crate::error::{DramaboxError, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Primary (signed) upstream surface
pub const DEFAULT_BASE_URL: &str = "https://sapi.dramaboxdb.com";

/// Secondary upstream surface used for stream lookups (no token required)
pub const DEFAULT_STREAM_BASE_URL: &str = "https://www.webfic.com";

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Prefix of the environment variables read by [`ClientConfig::from_env`]
const ENV_PREFIX: &str = "DRAMABOX";

/// Language partition used when the caller does not pick one
pub const DEFAULT_LANGUAGE: &str = "in";

/// Static header values that make requests look like the Android app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppProfile {
    /// Numeric app version code (`version` header)
    pub version_code: String,
    /// Human-readable app version (`vn` header)
    pub version_name: String,
    /// Distribution channel id (`cid` header)
    pub channel_id: String,
    pub package_name: String,
    /// Platform code (`p` header)
    pub platform: String,
    pub user_agent: String,
    pub time_zone: String,
    pub device_model: String,
    pub os_version: String,
}

impl Default for AppProfile {
    fn default() -> Self {
        Self {
            version_code: "430".to_string(),
            version_name: "4.3.0".to_string(),
            channel_id: "DRA1000042".to_string(),
            package_name: "com.storymatrix.drama".to_string(),
            platform: "43".to_string(),
            user_agent: "okhttp/4.10.0".to_string(),
            time_zone: "+0800".to_string(),
            device_model: "Redmi Note 8".to_string(),
            os_version: "9".to_string(),
        }
    }
}

/// Cache lifetimes per operation class
///
/// The token TTL only bounds how long a minted token sits in the shared cache;
/// token correctness relies on the token's own `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtls {
    pub token: Duration,
    pub list: Duration,
    pub detail: Duration,
    pub chapters: Duration,
    pub categories: Duration,
    pub search: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            token: Duration::from_secs(3600),
            list: Duration::from_secs(300),
            detail: Duration::from_secs(600),
            chapters: Duration::from_secs(600),
            categories: Duration::from_secs(1800),
            search: Duration::from_secs(180),
        }
    }
}

/// Heuristics for the chapter-listing pager
///
/// The thresholds are tuned against one upstream's undocumented throttling
/// behavior and are kept adjustable rather than assumed to generalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerConfig {
    /// Items per upstream window
    pub window_size: u32,
    /// Index of the first window
    pub first_index: u32,
    /// A window with this many items or fewer is suspicious
    pub throttle_threshold: usize,
    /// Windows starting this close to the end may legitimately be short
    pub near_end_margin: u32,
    /// Consecutive windows without new chapters before skipping ahead
    pub starvation_limit: u32,
    /// Pause between windows regardless of outcome
    pub pacing_delay: Duration,
    /// Pause between a forced token rotation and the recovery fetch
    pub recovery_delay: Duration,
    /// Re-fetch the paywall-boundary window before a recovery retry
    pub refetch_paywall_on_recovery: bool,
    /// Upper bound on the chapter count reported by the upstream
    pub max_chapters: u32,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            first_index: 1,
            throttle_threshold: 2,
            near_end_margin: 5,
            starvation_limit: 3,
            pacing_delay: Duration::from_millis(500),
            recovery_delay: Duration::from_millis(1500),
            refetch_paywall_on_recovery: true,
            max_chapters: 10_000,
        }
    }
}

impl PagerConfig {
    /// Index of the first window after the initial one
    pub fn second_index(&self) -> u32 {
        self.first_index.saturating_add(self.window_size)
    }
}

/// Configuration for DramaboxClient
/// Provides a builder pattern for client customization
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub stream_base_url: String,
    pub timeout: Duration,
    /// Key for the request signature (`sn` header)
    pub signing_secret: String,
    pub default_language: String,
    pub profile: AppProfile,
    pub cache_ttls: CacheTtls,
    /// Most entries the response cache keeps in memory
    pub cache_capacity: u64,
    pub pager: PagerConfig,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_base_url: DEFAULT_STREAM_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            signing_secret: "dramabox-android".to_string(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            profile: AppProfile::default(),
            cache_ttls: CacheTtls::default(),
            cache_capacity: DEFAULT_MAX_ENTRIES,
            pager: PagerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Build a configuration from `DRAMABOX_*` environment variables
    ///
    /// Recognized variables:
    /// - `DRAMABOX_BASE_URL`, `DRAMABOX_STREAM_BASE_URL`
    /// - `DRAMABOX_TIMEOUT_SECS`
    /// - `DRAMABOX_SIGNING_SECRET`
    /// - `DRAMABOX_LANGUAGE`
    /// - `DRAMABOX_CACHE_CAPACITY`
    /// - `DRAMABOX_PAGER_DELAY_MS`, `DRAMABOX_THROTTLE_THRESHOLD`, `DRAMABOX_NEAR_END_MARGIN`,
    ///   `DRAMABOX_MAX_CHAPTERS`
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if a variable does not parse into its
    /// type (out-of-range numbers included) or the resulting configuration
    /// fails [`ClientConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(source: config::Environment) -> Result<Self> {
        let overrides: EnvOverrides = config::Config::builder()
            .add_source(source.ignore_empty(true))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| DramaboxError::InvalidConfiguration(format!("environment: {}", e)))?;

        let config = overrides.apply(ClientConfig::builder()).build();
        config.validate()?;
        Ok(config)
    }

    /// Check that URLs parse and numeric knobs are usable
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("base_url", &self.base_url), ("stream_base_url", &self.stream_base_url)] {
            let url = Url::parse(value)
                .map_err(|e| DramaboxError::InvalidConfiguration(format!("{} '{}': {}", name, value, e)))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(DramaboxError::InvalidConfiguration(format!(
                    "{} must be http(s), got '{}'",
                    name, value
                )));
            }
        }

        if self.timeout.is_zero() {
            return Err(DramaboxError::InvalidConfiguration("timeout must be non-zero".to_string()));
        }
        if self.pager.window_size == 0 {
            return Err(DramaboxError::InvalidConfiguration("pager window size must be non-zero".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(DramaboxError::InvalidConfiguration("cache capacity must be non-zero".to_string()));
        }
        if self.signing_secret.is_empty() {
            return Err(DramaboxError::InvalidConfiguration("signing secret is empty".to_string()));
        }
        validate::language(&self.default_language)
            .map_err(|e| DramaboxError::InvalidConfiguration(format!("default language: {}", e)))?;

        Ok(())
    }
}

/// `DRAMABOX_*` overrides, keyed by the variable name without the prefix
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    base_url: Option<String>,
    stream_base_url: Option<String>,
    timeout_secs: Option<u64>,
    signing_secret: Option<String>,
    language: Option<String>,
    cache_capacity: Option<u64>,
    pager_delay_ms: Option<u64>,
    throttle_threshold: Option<usize>,
    near_end_margin: Option<u32>,
    max_chapters: Option<u32>,
}

impl EnvOverrides {
    fn apply(self, mut builder: ClientConfigBuilder) -> ClientConfigBuilder {
        if let Some(url) = self.base_url {
            builder = builder.base_url(url);
        }
        if let Some(url) = self.stream_base_url {
            builder = builder.stream_base_url(url);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secret) = self.signing_secret {
            builder = builder.signing_secret(secret);
        }
        if let Some(lang) = self.language {
            builder = builder.default_language(lang);
        }
        if let Some(capacity) = self.cache_capacity {
            builder = builder.cache_capacity(capacity);
        }

        let mut pager = PagerConfig::default();
        if let Some(ms) = self.pager_delay_ms {
            pager.pacing_delay = Duration::from_millis(ms);
        }
        if let Some(items) = self.throttle_threshold {
            pager.throttle_threshold = items;
        }
        if let Some(margin) = self.near_end_margin {
            pager.near_end_margin = margin;
        }
        if let Some(max) = self.max_chapters {
            pager.max_chapters = max;
        }
        builder.pager(pager)
    }
}

/// Builder for ClientConfig
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn stream_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.stream_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn signing_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.config.signing_secret = secret.into();
        self
    }

    pub fn default_language<S: Into<String>>(mut self, lang: S) -> Self {
        self.config.default_language = lang.into();
        self
    }

    pub fn profile(mut self, profile: AppProfile) -> Self {
        self.config.profile = profile;
        self
    }

    pub fn cache_ttls(mut self, ttls: CacheTtls) -> Self {
        self.config.cache_ttls = ttls;
        self
    }

    pub fn cache_capacity(mut self, max_entries: u64) -> Self {
        self.config.cache_capacity = max_entries;
        self
    }

    pub fn pager(mut self, pager: PagerConfig) -> Self {
        self.config.pager = pager;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::builder()
            .base_url("http://localhost:8080/")
            .timeout(Duration::from_secs(5))
            .signing_secret("secret")
            .default_language("en")
            .build();

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.signing_secret, "secret");
        assert_eq!(config.default_language, "en");
        assert_eq!(config.stream_base_url, DEFAULT_STREAM_BASE_URL);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = ClientConfig::builder().base_url("not a url").build();
        assert!(matches!(config.validate(), Err(DramaboxError::InvalidConfiguration(_))));

        let config = ClientConfig::builder().stream_base_url("ftp://example.com").build();
        assert!(matches!(config.validate(), Err(DramaboxError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ClientConfig::builder().timeout(Duration::ZERO).build();
        assert!(config.validate().is_err());
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(vars))
    }

    #[test]
    fn test_environment_overrides() {
        let config = ClientConfig::from_environment(environment(&[
            ("DRAMABOX_BASE_URL", "http://localhost:9000/"),
            ("DRAMABOX_TIMEOUT_SECS", "7"),
            ("DRAMABOX_LANGUAGE", "en"),
            ("DRAMABOX_CACHE_CAPACITY", "500"),
            ("DRAMABOX_NEAR_END_MARGIN", "8"),
            ("DRAMABOX_THROTTLE_THRESHOLD", "3"),
            ("DRAMABOX_SIGNING_SECRET", ""),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert_eq!(config.default_language, "en");
        assert_eq!(config.cache_capacity, 500);
        assert_eq!(config.pager.near_end_margin, 8);
        assert_eq!(config.pager.throttle_threshold, 3);
        assert_eq!(config.signing_secret, ClientConfig::default().signing_secret);
    }

    #[test]
    fn test_environment_rejects_out_of_range_numbers() {
        let result = ClientConfig::from_environment(environment(&[("DRAMABOX_NEAR_END_MARGIN", "4294967301")]));
        assert!(matches!(result, Err(DramaboxError::InvalidConfiguration(_))));

        let result = ClientConfig::from_environment(environment(&[("DRAMABOX_TIMEOUT_SECS", "soon")]));
        assert!(matches!(result, Err(DramaboxError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_default_language() {
        let config = ClientConfig::builder().default_language("english").build();
        assert!(matches!(config.validate(), Err(DramaboxError::InvalidConfiguration(_))));

        let result = ClientConfig::from_environment(environment(&[("DRAMABOX_LANGUAGE", "english")]));
        assert!(matches!(result, Err(DramaboxError::InvalidConfiguration(_))));

        assert!(ClientConfig::builder().default_language("pt-BR").build().validate().is_ok());
    }

    #[test]
    fn test_pager_defaults() {
        let pager = PagerConfig::default();
        assert_eq!(pager.window_size, 5);
        assert_eq!(pager.second_index(), 6);
        assert_eq!(pager.throttle_threshold, 2);
        assert_eq!(pager.near_end_margin, 5);
        assert_eq!(pager.starvation_limit, 3);
    }

    #[test]
    fn test_cache_ttl_classes() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.token, Duration::from_secs(3600));
        assert_eq!(ttls.chapters, Duration::from_secs(600));
        assert_eq!(ttls.categories, Duration::from_secs(1800));
        assert_eq!(ttls.search, Duration::from_secs(180));
    }
}
