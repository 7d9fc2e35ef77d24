use std::sync::Arc;

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::context::TraceContext;
use crate::crypto::cipher::SecretCipher;
use crate::crypto::password;
use crate::error::{SessionError, Result};
use crate::models::session::{CachedSession, LeakedPayload, Session};
use crate::models::session_key::SessionKey;
use crate::repositories::session_cache::{session_cache_key, VolatileSessionCache};
use crate::repositories::session_key::{DurableKeyStore, Publish};

/// The cache key namespace used unless configured otherwise.
pub const DEFAULT_CACHE_NAMESPACE: &str = "user-sess";

/// Issues, persists and reloads sessions across the durable key store and
/// the volatile session cache.
///
/// The session key is written to the durable store only. The cache receives
/// the session with its key detached, and a cached session that still
/// carries a key is treated as a leak: both copies are destroyed and
/// [`SessionError::SessionKeyLeaked`] is returned.
///
/// Holds no mutable state of its own; clones share the same stores and may be
/// used from any number of tasks.
#[derive(Clone)]
pub struct SessionManager {
    keys: Arc<dyn DurableKeyStore>,
    cache: Arc<dyn VolatileSessionCache>,
    cipher: SecretCipher,
    namespace: String,
}

/// Takes a session's key out for the lifetime of the guard and puts it back
/// when dropped.
struct DetachedKey<'a> {
    session: &'a mut Session,
    key: Option<SessionKey>,
}

impl<'a> DetachedKey<'a> {
    fn new(session: &'a mut Session) -> Self {
        let key = session.session_key.take();
        Self { session, key }
    }

    fn session(&self) -> &Session {
        &*self.session
    }
}

impl Drop for DetachedKey<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.session.session_key = Some(key);
        }
    }
}

impl SessionManager {
    /// Creates a new `SessionManager` using [`DEFAULT_CACHE_NAMESPACE`].
    pub fn new(
        keys: Arc<dyn DurableKeyStore>,
        cache: Arc<dyn VolatileSessionCache>,
        cipher: SecretCipher,
    ) -> Self {
        Self {
            keys,
            cache,
            cipher,
            namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
        }
    }

    /// Sets the prefix of the cache keys.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The cache key a user's session lives under.
    pub fn cache_key(&self, user_id: i64) -> String {
        session_cache_key(&self.namespace, user_id)
    }

    /// Creates a session protecting `service_key` under a fresh random
    /// session password. Performs no I/O.
    ///
    /// Key derivation is deliberately expensive; async callers should run
    /// this on a blocking thread.
    pub fn issue(
        &self,
        id: i64,
        user_id: i64,
        service_key: &str,
        expiration: DateTime<Utc>,
    ) -> Result<Session> {
        let password = password::generate_service_password()?;
        let raw = password::decode_password(&password)?;
        let encrypted_service_key = self.cipher.encrypt(service_key, &raw)?;

        tracing::debug!("🔐 Issued session {} for user {}", id, user_id);

        Ok(Session {
            id,
            user_id,
            started: Utc::now(),
            expiration,
            encrypted_service_key,
            session_key: Some(SessionKey::new(id, password.as_str().to_owned(), expiration)),
        })
    }

    /// Persists the session key durably and the key-less session in the
    /// cache, with a TTL running until the session's expiration.
    ///
    /// The cache write runs inside the key row's transaction, which commits
    /// only after it succeeded. If the commit itself fails, the cache entry
    /// is deleted again on a best-effort basis. The caller's session keeps
    /// its key.
    pub async fn store(&self, ctx: &TraceContext, session: &mut Session) -> Result<()> {
        if session.session_key.is_none() {
            return Err(SessionError::KeyNotLoaded);
        }
        let ttl = session
            .time_to_live(Utc::now())
            .ok_or(SessionError::Expired { session_id: session.id })?;
        let cache_key = self.cache_key(session.user_id);

        let payload = DetachedKey::new(session).session().to_cache_bytes()?;
        let key = session.session_key.as_ref().ok_or(SessionError::KeyNotLoaded)?;

        let mut published = false;
        let publish: Publish<'_> = Box::pin(async {
            self.cache.set(ctx, &cache_key, &payload, ttl).await?;
            published = true;
            Ok(())
        });

        let stored = self.keys.insert_and_publish(ctx, key, publish).await;
        if let Err(e) = stored {
            if published {
                tracing::error!("❌ Committing session key {} failed: {}", session.id, e);
                self.discard_entry(ctx, &cache_key).await;
            } else {
                tracing::error!("❌ Storing session {} failed: {}", session.id, e);
            }
            return Err(e);
        }

        tracing::info!(
            "✅ Session {} stored for user {} (ttl {}s)",
            session.id,
            session.user_id,
            ttl.as_secs()
        );
        Ok(())
    }

    /// Loads a user's session from the cache and attaches its key from the
    /// durable store.
    ///
    /// Returns `Ok(None)` when the user has no cached session. An entry that
    /// cannot be used is removed from the cache before the error is returned.
    pub async fn load(&self, ctx: &TraceContext, user_id: i64) -> Result<Option<Session>> {
        let cache_key = self.cache_key(user_id);

        let Some(bytes) = self.cache.get(ctx, &cache_key).await? else {
            tracing::debug!("No session cached for user {}", user_id);
            return Ok(None);
        };

        let mut session = match Session::decode_cached(&bytes) {
            Ok(CachedSession::Clean(session)) => session,
            Ok(CachedSession::Leaked(leaked)) => {
                self.purge_leak(ctx, user_id, &cache_key, &leaked).await;
                return Err(SessionError::SessionKeyLeaked { user_id });
            }
            Err(e) => {
                tracing::warn!("⚠️ Unreadable cache entry {}: {}", cache_key, e);
                self.discard_entry(ctx, &cache_key).await;
                return Err(e);
            }
        };

        if session.user_id != user_id {
            tracing::warn!(
                "⚠️ Cache entry {} holds a session of user {}",
                cache_key,
                session.user_id
            );
            self.discard_entry(ctx, &cache_key).await;
            return Err(SessionError::CacheCorruption(format!(
                "cache entry {} holds a session of user {}",
                cache_key, session.user_id
            )));
        }

        let key = self
            .keys
            .find(ctx, session.id)
            .await?
            .ok_or(SessionError::NoSessionKey { session_id: session.id })?;

        session.session_key = Some(key);
        tracing::debug!("✅ Session {} loaded for user {}", session.id, user_id);
        Ok(Some(session))
    }

    /// Best-effort removal of a cache entry.
    async fn discard_entry(&self, ctx: &TraceContext, cache_key: &str) {
        if let Err(e) = self.cache.delete(ctx, cache_key).await {
            tracing::warn!("⚠️ Could not remove cache entry {}: {}", cache_key, e);
        }
    }

    /// Destroys both copies of a session whose key reached the cache.
    ///
    /// The cache entry is always removed. A durable row is deleted only if it
    /// holds the leaked password, so a crafted payload cannot remove a row
    /// whose key it does not know.
    async fn purge_leak(
        &self,
        ctx: &TraceContext,
        user_id: i64,
        cache_key: &str,
        leaked: &LeakedPayload,
    ) {
        tracing::error!(
            "🚨 Session key leaked to cache for user {} (session {:?}, payload user {:?})",
            user_id,
            leaked.session_id,
            leaked.user_id
        );

        self.discard_entry(ctx, cache_key).await;

        let Some(key) = &leaked.key else {
            tracing::warn!("⚠️ Leaked key under {} is unreadable; durable rows left untouched", cache_key);
            return;
        };

        match self.keys.delete_matching(ctx, key.id, &key.raw).await {
            Ok(true) => tracing::info!("🗑️ Destroyed leaked session key {}", key.id),
            Ok(false) => tracing::warn!(
                "⚠️ Key leaked under {} matches no session_key row {}",
                cache_key,
                key.id
            ),
            Err(e) => tracing::warn!("⚠️ Could not delete session_key row {}: {}", key.id, e),
        }
    }

    /// Decrypts the session's service key.
    ///
    /// Requires the key attached by [`SessionManager::load`] or
    /// [`SessionManager::issue`].
    pub fn recover_secret(&self, session: &Session) -> Result<Zeroizing<String>> {
        let key = session.session_key.as_ref().ok_or(SessionError::KeyNotLoaded)?;
        let raw = key.decoded()?;
        self.cipher.decrypt(&session.encrypted_service_key, &raw)
    }

    /// Logs a session out: removes its durable key row and the cached copy.
    ///
    /// Requires the key attached by [`SessionManager::load`] or
    /// [`SessionManager::issue`]; the row is only deleted if it holds that
    /// key. A cache entry that already names a different session is kept.
    /// Returns whether the durable row was removed.
    pub async fn revoke(&self, ctx: &TraceContext, session: &Session) -> Result<bool> {
        let key = session.session_key.as_ref().ok_or(SessionError::KeyNotLoaded)?;
        let raw = key.decoded()?;
        let cache_key = self.cache_key(session.user_id);

        if let Some(bytes) = self.cache.get(ctx, &cache_key).await? {
            match Session::decode_cached(&bytes) {
                Ok(CachedSession::Clean(cached)) if cached.id != session.id => {
                    tracing::debug!("Cache entry {} belongs to session {}, kept", cache_key, cached.id);
                }
                _ => self.cache.delete(ctx, &cache_key).await?,
            }
        }

        let removed = self.keys.delete_matching(ctx, session.id, &raw).await?;
        tracing::info!(
            "👋 Session {} revoked for user {} (key row removed: {})",
            session.id,
            session.user_id,
            removed
        );
        Ok(removed)
    }
}
