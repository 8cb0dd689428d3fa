//! Two-tier cache: a bounded local tier (always present) plus an optional
//! remote key/value tier, with TTL, glob-prefix invalidation, and a
//! periodic sweeper.
//!
//! The local tier is grounded on the teacher's `tools/async_pipeline.rs`,
//! which caches tool results in an `lru::LruCache` directly; the remote
//! tier is new (§3 of SPEC_FULL.md) behind a trait so tests never need a
//! live server.

pub mod remote;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::clock::SharedClock;
use crate::descriptor::CacheTier;
use remote::RemoteCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTierKind {
    Memory,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_size: usize,
    pub max_entries: usize,
    pub utilization_percent: f64,
    pub tier: CacheTierKind,
    pub remote_connected: bool,
}

struct Entry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl Entry {
    /// Live iff `ttl == 0` (no expiry, spec's explicit resolution) or the
    /// elapsed time is within `ttl`.
    fn is_live(&self, now: Instant) -> bool {
        self.ttl.is_zero() || now.duration_since(self.stored_at) <= self.ttl
    }
}

/// The bounded local tier, backed by `lru::LruCache` — the same crate the
/// teacher uses for its tool-result cache in `tools/async_pipeline.rs`.
/// Recency (not insertion order) drives eviction once the cap is hit.
struct LocalTier {
    entries: LruCache<String, Entry>,
}

impl LocalTier {
    fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: LruCache::new(cap),
        }
    }

    fn set(&mut self, key: String, value: Value, ttl: Duration, now: Instant) {
        self.entries.put(
            key,
            Entry {
                value,
                stored_at: now,
                ttl,
            },
        );
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<Value> {
        let live = self.entries.peek(key).map(|entry| entry.is_live(now))?;
        if !live {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn delete(&mut self, key: &str) {
        self.entries.pop(key);
    }

    fn invalidate(&mut self, pattern: &str) {
        let prefix = pattern.trim_end_matches('*');
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in matching {
            self.delete(&key);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn sweep(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.delete(&key);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn cap(&self) -> usize {
        self.entries.cap().get()
    }
}

/// Process-wide two-tier cache.
pub struct Cache {
    local: Arc<parking_lot::Mutex<LocalTier>>,
    remote: Option<Arc<dyn RemoteCache>>,
    clock: SharedClock,
}

impl Cache {
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            local: Arc::new(parking_lot::Mutex::new(LocalTier::new(max_entries))),
            remote: None,
            clock,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Reads local first; on a local miss with a remote tier configured,
    /// checks remote and warm-promotes into the local tier on hit.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_tiered(key, CacheTier::Hybrid).await
    }

    /// Write-through: updates the local tier and, if configured, the
    /// remote tier.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.set_tiered(key, value, ttl, CacheTier::Hybrid).await
    }

    /// Tier-aware read, honouring a tool's declared `cache_policy.tier`
    /// (spec.md §3): `Memory` never consults the remote tier even when one
    /// is configured; `Remote` bypasses the local tier entirely; `Hybrid`
    /// is the local-first-then-remote-with-promotion behaviour `get` uses
    /// by default.
    pub async fn get_tiered(&self, key: &str, tier: CacheTier) -> Option<Value> {
        let now = self.clock.now();
        match tier {
            CacheTier::Memory => self.local.lock().get(key, now),
            CacheTier::Remote => {
                let remote = self.remote.as_ref()?;
                remote.get(key).await.ok().flatten()
            }
            CacheTier::Hybrid => {
                if let Some(value) = self.local.lock().get(key, now) {
                    return Some(value);
                }
                let remote = self.remote.as_ref()?;
                let value = remote.get(key).await.ok().flatten()?;
                self.local.lock().set(key.to_string(), value.clone(), Duration::ZERO, now);
                Some(value)
            }
        }
    }

    /// Tier-aware write-through, honouring a tool's declared
    /// `cache_policy.tier`: `Memory` only ever touches the local tier;
    /// `Remote` only ever touches the remote tier (a no-op if none is
    /// configured); `Hybrid` writes through both.
    pub async fn set_tiered(&self, key: &str, value: Value, ttl: Duration, tier: CacheTier) {
        let now = self.clock.now();
        match tier {
            CacheTier::Memory => {
                self.local.lock().set(key.to_string(), value, ttl, now);
            }
            CacheTier::Remote => {
                if let Some(remote) = &self.remote {
                    let _ = remote.set(key, &value, ttl).await;
                }
            }
            CacheTier::Hybrid => {
                self.local.lock().set(key.to_string(), value.clone(), ttl, now);
                if let Some(remote) = &self.remote {
                    let _ = remote.set(key, &value, ttl).await;
                }
            }
        }
        debug!(key = %key, tier = ?tier, "cache set");
    }

    pub async fn delete(&self, key: &str) {
        self.local.lock().delete(key);
        if let Some(remote) = &self.remote {
            let _ = remote.delete(key).await;
        }
    }

    /// Shell-glob invalidation (`prefix*`): removes every key whose prefix
    /// matches the pattern's literal prefix. Only local tier keys are
    /// tracked for pattern invalidation; the remote tier is asked
    /// separately via its own `KEYS`-style scan.
    pub async fn invalidate(&self, pattern: &str) {
        self.local.lock().invalidate(pattern);
        if let Some(remote) = &self.remote {
            let _ = remote.invalidate(pattern).await;
        }
    }

    pub async fn clear(&self) {
        self.local.lock().clear();
        if let Some(remote) = &self.remote {
            let _ = remote.clear().await;
        }
    }

    /// Periodic sweeper entrypoint; callers drive this on a 60s interval.
    pub fn sweep(&self) {
        self.local.lock().sweep(self.clock.now());
    }

    pub fn stats(&self) -> CacheStats {
        let local = self.local.lock();
        let size = local.len();
        let max = local.cap();
        CacheStats {
            memory_size: size,
            max_entries: max,
            utilization_percent: if max == 0 {
                0.0
            } else {
                (size as f64 / max as f64) * 100.0
            },
            tier: if self.remote.is_some() {
                CacheTierKind::Hybrid
            } else {
                CacheTierKind::Memory
            },
            remote_connected: self.remote.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    #[tokio::test]
    async fn ttl_expires_entries() {
        let clock = ManualClock::new();
        let cache = Cache::new(10, Arc::new(clock.clone()));
        cache.set("k", json!({"v": 1}), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(json!({"v": 1})));
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn ttl_zero_never_expires() {
        let clock = ManualClock::new();
        let cache = Cache::new(10, Arc::new(clock.clone()));
        cache.set("k", json!(1), Duration::ZERO).await;
        clock.advance(Duration::from_secs(100_000));
        assert_eq!(cache.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn lru_bound_holds_under_churn() {
        let clock = ManualClock::new();
        let cache = Cache::new(3, Arc::new(clock.clone()));
        for i in 0..10 {
            cache.set(&format!("k{i}"), json!(i), Duration::from_secs(60)).await;
        }
        assert!(cache.stats().memory_size <= 3);
    }

    #[tokio::test]
    async fn invalidate_removes_exact_prefix_matches() {
        let clock = ManualClock::new();
        let cache = Cache::new(10, Arc::new(clock.clone()));
        cache.set("a:1", json!(1), Duration::ZERO).await;
        cache.set("a:2", json!(2), Duration::ZERO).await;
        cache.set("b:1", json!(3), Duration::ZERO).await;
        cache.invalidate("a:*").await;
        assert_eq!(cache.get("a:1").await, None);
        assert_eq!(cache.get("a:2").await, None);
        assert_eq!(cache.get("b:1").await, Some(json!(3)));
    }
}
