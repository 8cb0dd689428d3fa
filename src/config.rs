//! Runtime configuration: breaker/cache/rate-limit defaults, the executor's
//! batch concurrency, and metrics retention — spec.md §6's "Environment
//! knobs", loaded the way `vtcode-config` layers a TOML file under
//! environment-variable overrides (struct-of-structs, `Default` carrying the
//! documented defaults, explicit override fields rather than a generic map).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_cache_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            default_ttl_seconds: default_cache_ttl_seconds(),
            sweep_interval_seconds: default_cache_sweep_interval_seconds(),
            remote_url: None,
        }
    }
}

fn default_cache_max_entries() -> usize {
    10_000
}
fn default_cache_ttl_seconds() -> u64 {
    300
}
fn default_cache_sweep_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
    #[serde(default = "default_max_breakers")]
    pub max_breakers: usize,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            failure_window_ms: default_failure_window_ms(),
            max_breakers: default_max_breakers(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            failure_window: Duration::from_millis(self.failure_window_ms),
            max_breakers: self.max_breakers,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_failure_window_ms() -> u64 {
    60_000
}
fn default_max_breakers() -> usize {
    500
}
fn default_max_backoff_ms() -> u64 {
    300_000
}
fn default_backoff_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
            hard_timeout_ms: default_hard_timeout_ms(),
        }
    }
}

impl ExecutorSettings {
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }
}

fn default_batch_concurrency() -> usize {
    5
}
fn default_hard_timeout_ms() -> u64 {
    5 * 60 * 1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_registry_capacity")]
    pub capacity: usize,
}

fn default_registry_capacity() -> usize {
    500
}

/// Process-wide configuration, loaded from an optional TOML file and then
/// overridden by `TOOLMESH_*` environment variables — same two-stage layer
/// the teacher's config loader uses (file defaults, env wins).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
}

impl RuntimeConfig {
    /// Loads from `path` if it exists (TOML), falling back to defaults, then
    /// applies `TOOLMESH_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => RuntimeConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u32("TOOLMESH_BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = env_u64("TOOLMESH_BREAKER_RESET_TIMEOUT_MS") {
            self.breaker.reset_timeout_ms = v;
        }
        if let Some(v) = env_usize("TOOLMESH_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = v;
        }
        if let Some(v) = env_u64("TOOLMESH_CACHE_DEFAULT_TTL_SECONDS") {
            self.cache.default_ttl_seconds = v;
        }
        if let Ok(v) = std::env::var("TOOLMESH_CACHE_REMOTE_URL") {
            self.cache.remote_url = Some(v);
        }
        if let Some(v) = env_usize("TOOLMESH_EXECUTOR_BATCH_CONCURRENCY") {
            self.executor.batch_concurrency = v;
        }
        if let Some(v) = env_u64("TOOLMESH_EXECUTOR_HARD_TIMEOUT_MS") {
            self.executor.hard_timeout_ms = v;
        }
        if let Some(v) = env_u32("TOOLMESH_METRICS_RETENTION_DAYS") {
            self.metrics.retention_days = v;
        }
        if let Some(v) = env_usize("TOOLMESH_REGISTRY_CAPACITY") {
            self.registry.capacity = v;
        }
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
