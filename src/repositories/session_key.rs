use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::Instrument;
use zeroize::Zeroizing;

use crate::context::TraceContext;
use crate::crypto::password;
use crate::error::Result;
use crate::models::session_key::SessionKey;

const INSERT_SESSION_KEY: &str = r#"
    INSERT INTO session_key (id, "key", expiration)
    VALUES ($1, $2, $3)
    ON CONFLICT (id) DO NOTHING
"#;

const SELECT_SESSION_KEY: &str = r#"
    SELECT id, "key", expiration
    FROM session_key
    WHERE id = $1 AND expiration > NOW()
    LIMIT 1
"#;

const LOCK_SESSION_KEY: &str = r#"SELECT "key" FROM session_key WHERE id = $1 FOR UPDATE"#;

const DELETE_SESSION_KEY: &str = "DELETE FROM session_key WHERE id = $1";

const DELETE_EXPIRED_SESSION_KEYS: &str = "DELETE FROM session_key WHERE expiration <= NOW()";

/// Work run between the insert and the commit of a key row; the row is
/// committed only if it succeeds.
pub type Publish<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Durable, authoritative storage of session keys.
#[async_trait]
pub trait DurableKeyStore: Send + Sync {
    /// Inserts `key` unless a row with the same id exists, then awaits
    /// `publish` and commits.
    ///
    /// If `publish` fails, or the returned future is dropped before the
    /// commit, the insert is rolled back.
    async fn insert_and_publish<'a>(
        &self,
        ctx: &TraceContext,
        key: &SessionKey,
        publish: Publish<'a>,
    ) -> Result<()>;

    /// Loads the unexpired key row for `id`.
    async fn find(&self, ctx: &TraceContext, id: i64) -> Result<Option<SessionKey>>;

    /// Deletes the row for `id` only if it holds exactly `raw`.
    ///
    /// Returns whether a row was deleted.
    async fn delete_matching(&self, ctx: &TraceContext, id: i64, raw: &[u8]) -> Result<bool>;

    /// Deletes every expired key row, returning how many were removed.
    async fn purge_expired(&self, ctx: &TraceContext) -> Result<u64>;
}

/// A helper function to map a `tokio_postgres::Row` to a `SessionKey`.
fn row_to_session_key(row: &Row) -> Result<SessionKey> {
    let id: i64 = row.try_get("id")?;
    let raw = Zeroizing::new(row.try_get::<_, Vec<u8>>("key")?);
    let expiration: DateTime<Utc> = row.try_get("expiration")?;

    Ok(SessionKey::from_raw(id, &raw, expiration))
}

/// PostgreSQL-backed [`DurableKeyStore`].
#[derive(Clone)]
pub struct PgKeyStore {
    pool: Pool,
}

impl PgKeyStore {
    /// Creates a new `PgKeyStore`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn insert_row(&self, key: &SessionKey, publish: Publish<'_>) -> Result<()> {
        let raw = key.decoded()?;
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        transaction
            .execute(INSERT_SESSION_KEY, &[&key.id, &raw.as_slice(), &key.expiration])
            .await?;
        tracing::debug!("🔑 session_key row staged for session {}", key.id);

        // dropping the transaction on error rolls it back
        publish.await?;

        transaction.commit().await?;
        tracing::debug!("✅ session_key row committed for session {}", key.id);
        Ok(())
    }

    async fn find_row(&self, id: i64) -> Result<Option<SessionKey>> {
        let client = self.pool.get().await?;
        let row = client.query_opt(SELECT_SESSION_KEY, &[&id]).await?;
        row.map(|r| row_to_session_key(&r)).transpose()
    }

    async fn delete_matching_row(&self, id: i64, raw: &[u8]) -> Result<bool> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let stored = match transaction.query_opt(LOCK_SESSION_KEY, &[&id]).await? {
            Some(row) => Zeroizing::new(row.try_get::<_, Vec<u8>>("key")?),
            None => return Ok(false),
        };

        if !password::same_password(&stored, raw) {
            tracing::warn!("⚠️ session_key {} does not hold the presented key, kept", id);
            return Ok(false);
        }

        transaction.execute(DELETE_SESSION_KEY, &[&id]).await?;
        transaction.commit().await?;
        tracing::debug!("🗑️ Deleted session_key row for session {}", id);
        Ok(true)
    }

    async fn delete_expired_rows(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let removed = client.execute(DELETE_EXPIRED_SESSION_KEYS, &[]).await?;
        tracing::info!("🧹 Purged {} expired session keys", removed);
        Ok(removed)
    }
}

#[async_trait]
impl DurableKeyStore for PgKeyStore {
    async fn insert_and_publish<'a>(
        &self,
        ctx: &TraceContext,
        key: &SessionKey,
        publish: Publish<'a>,
    ) -> Result<()> {
        self.insert_row(key, publish)
            .instrument(ctx.child("session_key.insert"))
            .await
    }

    async fn find(&self, ctx: &TraceContext, id: i64) -> Result<Option<SessionKey>> {
        self.find_row(id).instrument(ctx.child("session_key.find")).await
    }

    async fn delete_matching(&self, ctx: &TraceContext, id: i64, raw: &[u8]) -> Result<bool> {
        self.delete_matching_row(id, raw)
            .instrument(ctx.child("session_key.delete"))
            .await
    }

    async fn purge_expired(&self, ctx: &TraceContext) -> Result<u64> {
        self.delete_expired_rows()
            .instrument(ctx.child("session_key.purge_expired"))
            .await
    }
}

