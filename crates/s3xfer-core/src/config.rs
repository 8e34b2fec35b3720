use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Part size used when `part_size` is 0: 8 MiB.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Throughput one endpoint address sustains, in Gbps, and the number of
/// connections it takes to reach it. Used to derive concurrency from
/// `throughput_target_gbps` when `max_concurrency` is 0.
const THROUGHPUT_PER_ENDPOINT_GBPS: f64 = 4.0;
const CONNECTIONS_PER_ENDPOINT: usize = 10;

/// Ceiling on in-flight parts per client. The admission gate's semaphore
/// cannot hold more permits than this.
pub const MAX_CONCURRENCY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per exchange (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 0.25,
            max_delay_secs: 20,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.base_delay_secs.is_finite() && self.base_delay_secs >= 0.0,
            "retry.base_delay_secs must be a non-negative number, got {}",
            self.base_delay_secs
        );
        ensure!(
            self.base_delay_secs <= self.max_delay_secs.max(1) as f64,
            "retry.base_delay_secs ({}) exceeds retry.max_delay_secs ({})",
            self.base_delay_secs,
            self.max_delay_secs
        );
        Ok(())
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::try_from_secs_f64(self.base_delay_secs).unwrap_or_default(),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Client configuration loaded from `~/.config/s3xfer/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Target endpoint region (e.g. "us-west-2").
    pub region: String,
    /// Bytes per sub-request. 0 selects [`DEFAULT_PART_SIZE`].
    #[serde(default)]
    pub part_size: u64,
    /// Bound on in-flight parts across every meta-request of one client.
    /// 0 derives the bound from `throughput_target_gbps`.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Throughput the client aims for when `max_concurrency` is 0.
    #[serde(default = "default_throughput_target")]
    pub throughput_target_gbps: f64,
    /// Whether TLS is required.
    #[serde(default = "default_secure")]
    pub secure: bool,
    /// How many parts of one GET may be buffered ahead of the caller's
    /// delivery position. 0 = twice the concurrency bound.
    #[serde(default)]
    pub max_buffered_parts: usize,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_throughput_target() -> f64 {
    10.0
}

fn default_secure() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            part_size: 0,
            max_concurrency: 0,
            throughput_target_gbps: default_throughput_target(),
            secure: true,
            max_buffered_parts: 0,
            retry: None,
        }
    }
}

impl ClientConfig {
    /// Part size with the engine default applied.
    pub fn effective_part_size(&self) -> u64 {
        if self.part_size == 0 {
            DEFAULT_PART_SIZE
        } else {
            self.part_size
        }
    }

    /// Concurrency bound, derived from the throughput target when unset.
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        let target = if self.throughput_target_gbps > 0.0 {
            self.throughput_target_gbps
        } else {
            default_throughput_target()
        };
        let endpoints = (target / THROUGHPUT_PER_ENDPOINT_GBPS).ceil().max(1.0) as usize;
        endpoints
            .saturating_mul(CONNECTIONS_PER_ENDPOINT)
            .min(MAX_CONCURRENCY)
    }

    pub fn effective_buffered_parts(&self) -> usize {
        if self.max_buffered_parts > 0 {
            self.max_buffered_parts
        } else {
            self.effective_concurrency().saturating_mul(2).max(2)
        }
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.region.trim().is_empty(), "region is empty");
        ensure!(
            self.throughput_target_gbps.is_finite() && self.throughput_target_gbps >= 0.0,
            "throughput_target_gbps must be a non-negative number, got {}",
            self.throughput_target_gbps
        );
        ensure!(
            self.max_concurrency <= MAX_CONCURRENCY,
            "max_concurrency {} exceeds {}",
            self.max_concurrency,
            MAX_CONCURRENCY
        );
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().to_policy()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("s3xfer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ClientConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ClientConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ClientConfig = toml::from_str(&data)?;
    Ok(cfg)
}
