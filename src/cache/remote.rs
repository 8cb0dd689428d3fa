//! Remote cache tier contract: `GET`/`SETEX`/`DEL`/`KEYS`/`FLUSHDB`, as
//! named in spec.md §6, addressed by the same string key as the local
//! tier.
//!
//! Kept behind a trait so the local tier and the executor's tests never
//! need a live server. The concrete implementation targets the `redis`
//! crate (`tokio-comp`), the transport other agent/tool-infrastructure
//! repos in this pack use for exactly this role.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// Shell-glob invalidation against the remote tier's keyspace.
    async fn invalidate(&self, pattern: &str) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

#[cfg(feature = "remote-cache")]
pub use redis_backed::RedisRemoteCache;

#[cfg(feature = "remote-cache")]
mod redis_backed {
    use super::*;
    use redis::AsyncCommands;

    pub struct RedisRemoteCache {
        client: redis::Client,
    }

    impl RedisRemoteCache {
        pub fn connect(url: &str) -> anyhow::Result<Self> {
            Ok(Self {
                client: redis::Client::open(url)?,
            })
        }
    }

    #[async_trait]
    impl RemoteCache for RedisRemoteCache {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let raw: Option<String> = conn.get(key).await?;
            Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
        }

        async fn set(&self, key: &str, value: &Value, ttl: Duration) -> anyhow::Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let payload = serde_json::to_string(value)?;
            if ttl.is_zero() {
                let _: () = conn.set(key, payload).await?;
            } else {
                let _: () = conn.set_ex(key, payload, ttl.as_secs().max(1)).await?;
            }
            Ok(())
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = conn.del(key).await?;
            Ok(())
        }

        async fn invalidate(&self, pattern: &str) -> anyhow::Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let glob = if pattern.ends_with('*') {
                pattern.to_string()
            } else {
                format!("{pattern}*")
            };
            let keys: Vec<String> = conn.keys(glob).await?;
            if !keys.is_empty() {
                let _: () = conn.del(keys).await?;
            }
            Ok(())
        }

        async fn clear(&self) -> anyhow::Result<()> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            Ok(())
        }
    }
}
