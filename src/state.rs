use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use crate::config::Config;
use crate::crypto::cipher::SecretCipher;
use crate::error::Result;
use crate::repositories::session_cache::RedisSessionCache;
use crate::repositories::session_key::PgKeyStore;
use crate::services::session::SessionManager;

/// The live stores and the manager wired on top of them.
#[derive(Clone)]
pub struct SessionState {
    /// The database connection pool.
    pub db: Pool,
    /// The Redis connection manager.
    pub redis: ConnectionManager,
    /// The session layer's configuration.
    pub config: Config,
    /// Session issuance and persistence.
    pub sessions: SessionManager,
}

impl SessionState {
    /// Connects to PostgreSQL and Redis, ensures the `session_key` schema
    /// and builds the `SessionManager`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url, config.database_pool_size)?;
        crate::db::ensure_schema(&db).await?;
        tracing::info!("✅ PostgreSQL Pool initialized (max {} connections)", config.database_pool_size);

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized");

        let cipher = SecretCipher::new(config.cipher)?;
        let sessions = SessionManager::new(
            Arc::new(PgKeyStore::new(db.clone())),
            Arc::new(RedisSessionCache::new(redis.clone())),
            cipher,
        )
        .with_namespace(config.cache_namespace.clone());
        tracing::info!("✅ SessionManager ready (namespace {})", config.cache_namespace);

        Ok(SessionState {
            db,
            redis,
            config: config.clone(),
            sessions,
        })
    }

    /// Expiration for a session issued now.
    pub fn expiration_from_now(&self) -> DateTime<Utc> {
        Utc::now() + self.config.session_duration()
    }
}
