use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Environment variable overriding `endpoint`.
pub const ENDPOINT_ENV: &str = "DECKGEN_ENDPOINT";
/// Environment variable overriding `api_key`.
pub const API_KEY_ENV: &str = "DECKGEN_API_KEY";

/// Retry policy for submit/download calls (`[retry]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per call (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            jitter: self.jitter,
        }
    }
}

/// Outbound call throttling (`[throttle]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum concurrent calls to the job API across all tasks.
    pub max_concurrent: usize,
    /// Minimum spacing between two dispatches, in milliseconds.
    pub min_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_interval_ms: 100,
        }
    }
}

/// Response cache and dedup window (`[cache]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached response stays valid, in milliseconds.
    pub ttl_ms: u64,
    /// Capacity; the oldest entry is evicted beyond this.
    pub max_entries: usize,
    /// Period of the background sweep of expired entries, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 60_000,
            max_entries: 256,
            sweep_interval_ms: 30_000,
        }
    }
}

/// Adaptive polling bounds (`[poll]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Floor for the shortened interval after a large progress jump.
    pub min_interval_ms: u64,
    /// Ceiling for the stalled-progress backoff.
    pub max_interval_ms: u64,
    /// Growth factor per consecutive stalled poll.
    pub stall_multiplier: f64,
    /// Retryable status-query failures tolerated in a row before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            max_interval_ms: 30_000,
            stall_multiplier: 1.5,
            max_consecutive_errors: 3,
        }
    }
}

/// Client configuration loaded from `~/.config/deckgen/config.toml`.
///
/// Passed explicitly to every component; changing it means building a new value
/// and handing it to `DeckClient::reconfigure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckgenConfig {
    /// Base URL of the job API (e.g. `https://api.example.com/prod`).
    pub endpoint: String,
    /// API key sent as `x-api-key`; empty means no header.
    pub api_key: String,
    /// Base interval between status polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of status polls before the task times out.
    pub max_poll_attempts: u32,
    /// Per-request timeout, in milliseconds.
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
    pub cache: CacheConfig,
    pub poll: PollConfig,
}

impl Default for DeckgenConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000".to_string(),
            api_key: String::new(),
            poll_interval_ms: 3_000,
            max_poll_attempts: 200,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            throttle: ThrottleConfig::default(),
            cache: CacheConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl DeckgenConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_ms)
    }

    /// Reject values that would make the client misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            bail!("endpoint must not be empty");
        }
        if url::Url::parse(self.endpoint.trim()).is_err() {
            bail!("endpoint is not a valid URL: {}", self.endpoint);
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be > 0");
        }
        if self.max_poll_attempts == 0 {
            bail!("max_poll_attempts must be > 0");
        }
        if self.throttle.max_concurrent == 0 {
            bail!("throttle.max_concurrent must be > 0");
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            bail!("retry.backoff_multiplier must be a finite number >= 1");
        }
        if !self.poll.stall_multiplier.is_finite() || self.poll.stall_multiplier < 1.0 {
            bail!("poll.stall_multiplier must be a finite number >= 1");
        }
        if self.poll.min_interval_ms > self.poll.max_interval_ms {
            bail!(
                "poll.min_interval_ms ({}) exceeds poll.max_interval_ms ({})",
                self.poll.min_interval_ms,
                self.poll.max_interval_ms
            );
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        Ok(())
    }

    /// Apply `DECKGEN_ENDPOINT` / `DECKGEN_API_KEY` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENDPOINT_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, endpoint: Option<String>, api_key: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|v| !v.trim().is_empty()) {
            self.endpoint = endpoint.trim().to_string();
        }
        if let Some(key) = api_key {
            self.api_key = key.trim().to_string();
        }
    }

    /// Copy suitable for display: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if !cfg.api_key.is_empty() {
            cfg.api_key = "********".to_string();
        }
        cfg
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("deckgen")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
/// Environment overrides are applied and the result validated.
pub fn load_or_init() -> Result<DeckgenConfig> {
    let path = config_path()?;
    let mut cfg = load_or_init_at(&path)?;
    cfg.apply_env();
    cfg.validate()?;
    Ok(cfg)
}

/// Like `load_or_init` for an explicit path, without environment overrides.
pub fn load_or_init_at(path: &Path) -> Result<DeckgenConfig> {
    if !path.exists() {
        let default_cfg = DeckgenConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: DeckgenConfig = toml::from_str(&data)?;
    Ok(cfg)
}
