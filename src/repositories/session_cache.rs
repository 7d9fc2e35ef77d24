use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::Instrument;

use crate::context::TraceContext;
use crate::error::Result;

/// Volatile, TTL-bounded storage of serialized sessions.
///
/// Treated as less trusted than [`crate::DurableKeyStore`]: nothing that
/// decrypts a service key may be written here.
#[async_trait]
pub trait VolatileSessionCache: Send + Sync {
    /// Reads the entry under `key`; `None` on a miss or after expiry.
    async fn get(&self, ctx: &TraceContext, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` under `key`, replacing any previous entry.
    async fn set(&self, ctx: &TraceContext, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Removes the entry under `key`, if any.
    async fn delete(&self, ctx: &TraceContext, key: &str) -> Result<()>;
}

/// Builds the cache key for a user's session.
pub fn session_cache_key(namespace: &str, user_id: i64) -> String {
    format!("{}-{}", namespace, user_id)
}

/// Redis-backed [`VolatileSessionCache`].
#[derive(Clone)]
pub struct RedisSessionCache {
    redis: ConnectionManager,
}

impl RedisSessionCache {
    /// Creates a new `RedisSessionCache`.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn get_entry(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut redis = self.redis.clone();
        let value: Option<Vec<u8>> = redis.get(key).await?;
        Ok(value)
    }

    async fn set_entry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut redis = self.redis.clone();
        // PSETEX rejects a zero TTL
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis.pset_ex(key, value, millis).await?;
        tracing::debug!("✅ Session cached at {} for {}ms", key, millis);
        Ok(())
    }

    async fn delete_entry(&self, key: &str) -> Result<()> {
        let mut redis = self.redis.clone();
        let _: () = redis.del(key).await?;
        Ok(())
    }
}

#[async_trait]
impl VolatileSessionCache for RedisSessionCache {
    async fn get(&self, ctx: &TraceContext, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_entry(key).instrument(ctx.child("cache.get")).await
    }

    async fn set(&self, ctx: &TraceContext, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.set_entry(key, value, ttl)
            .instrument(ctx.child("cache.set"))
            .await
    }

    async fn delete(&self, ctx: &TraceContext, key: &str) -> Result<()> {
        self.delete_entry(key).instrument(ctx.child("cache.delete")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_namespaced_by_user() {
        assert_eq!(session_cache_key("gigo-user-sess", 420), "gigo-user-sess-420");
        assert_eq!(session_cache_key("user-sess", -1), "user-sess--1");
    }
}
