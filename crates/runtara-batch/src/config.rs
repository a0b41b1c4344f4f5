// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the batch client.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use runtara_batch_http::CongestionConfig;

use crate::error::{BatchError, Result};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for shard records.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default sampling seed for shard records.
pub const DEFAULT_SEED: u64 = 420;

/// Configuration for the BatchClient.
#[derive(Clone)]
pub struct BatchConfig {
    /// Bearer token sent with every call.
    pub api_key: String,
    /// API root, without a trailing slash.
    pub base_url: String,
    /// Model used when a request does not name one.
    pub model: String,
    /// Seed used when a request does not override it. `None` omits it.
    pub seed: Option<u64>,
    /// Directory of the persisted cache tier. `None` disables it.
    pub cache_dir: Option<PathBuf>,
    /// Per-call timeout of the base transport.
    pub request_timeout: Duration,
    /// Throttling behaviour shared by every call of one client.
    pub congestion: CongestionConfig,
}

// Keeps the token out of logs.
impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("seed", &self.seed)
            .field("cache_dir", &self.cache_dir)
            .field("request_timeout", &self.request_timeout)
            .field("congestion", &self.congestion)
            .finish()
    }
}

impl BatchConfig {
    /// Create a configuration with default values and the given token.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            seed: Some(DEFAULT_SEED),
            cache_dir: None,
            request_timeout: Duration::from_secs(300),
            congestion: CongestionConfig::default(),
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `OPENAI_API_KEY`: Bearer token (required)
    /// - `OPENAI_BASE_URL`: API root (default: "https://api.openai.com/v1")
    /// - `RUNTARA_BATCH_MODEL`: Default model (default: "gpt-4o")
    /// - `RUNTARA_BATCH_SEED`: Default seed, empty to omit (default: 420)
    /// - `RUNTARA_BATCH_CACHE_DIR`: Persisted cache directory (default: none)
    /// - `RUNTARA_BATCH_REQUEST_TIMEOUT_MS`: Request timeout in milliseconds (default: 300000)
    /// - `RUNTARA_BATCH_MAX_ATTEMPTS`: Throttled attempt ceiling, 0 for unlimited (default: 0)
    /// - `RUNTARA_BATCH_MIN_BACKOFF_MS`: Minimum backoff in milliseconds (default: 1000)
    /// - `RUNTARA_BATCH_MAX_BACKOFF_MS`: Maximum backoff in milliseconds (default: 60000)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| BatchError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = Self::new(api_key);

        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        if let Ok(model) = std::env::var("RUNTARA_BATCH_MODEL") {
            config = config.with_model(model);
        }
        if let Ok(seed) = std::env::var("RUNTARA_BATCH_SEED") {
            config.seed = if seed.trim().is_empty() {
                None
            } else {
                Some(parse_var("RUNTARA_BATCH_SEED", &seed)?)
            };
        }
        if let Ok(dir) = std::env::var("RUNTARA_BATCH_CACHE_DIR")
            && !dir.trim().is_empty()
        {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = env_number::<u64>("RUNTARA_BATCH_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        let mut congestion = config.congestion.clone();
        if let Some(attempts) = env_number::<u32>("RUNTARA_BATCH_MAX_ATTEMPTS")? {
            congestion = congestion.with_max_attempts(attempts);
        }
        if let Some(ms) = env_number::<u64>("RUNTARA_BATCH_MIN_BACKOFF_MS")? {
            congestion = congestion.with_min_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env_number::<u64>("RUNTARA_BATCH_MAX_BACKOFF_MS")? {
            congestion = congestion.with_max_backoff(Duration::from_millis(ms));
        }
        config.congestion = congestion;

        Ok(config)
    }

    /// Set the API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model. An empty name keeps the current one.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Enable the persisted cache tier.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_congestion(mut self, congestion: CongestionConfig) -> Self {
        self.congestion = congestion;
        self
    }
}

fn env_number<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => parse_var(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| BatchError::Config(format!("invalid {}: {}", name, e)))
}
