use thiserror::Error;

/// The session layer's error type.
///
/// A missing session is not represented here: [`crate::SessionManager::load`]
/// returns `Ok(None)` for a user without a cached session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The OS random source could not produce key material.
    #[error("Entropy error: {0}")]
    Entropy(String),

    /// Key derivation, encryption or decryption failed.
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// No pooled PostgreSQL connection could be obtained.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A durable store failure not raised by the driver.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A volatile cache failure not raised by the driver.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The cached session payload could not be decoded.
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// A session key was found inside the volatile cache.
    #[error("session key has been leaked to the cache for user {user_id}")]
    SessionKeyLeaked { user_id: i64 },

    /// The cached session has no matching durable key row.
    #[error("no session key found for session {session_id}")]
    NoSessionKey { session_id: i64 },

    /// The session key was not loaded before it was needed.
    #[error("session key not loaded")]
    KeyNotLoaded,

    /// The session expired before it could be stored.
    #[error("session {session_id} has already expired")]
    Expired { session_id: i64 },
}

impl SessionError {
    /// Whether this error is the key-leak security incident.
    pub fn is_security_incident(&self) -> bool {
        matches!(self, SessionError::SessionKeyLeaked { .. })
    }

    /// Whether the caller should drop the session and force a fresh login
    /// instead of retrying.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            SessionError::SessionKeyLeaked { .. }
                | SessionError::Cipher(_)
                | SessionError::NoSessionKey { .. }
                | SessionError::CacheCorruption(_)
        )
    }
}

/// A `Result` type that uses `SessionError` as the error type.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leak_is_the_only_security_incident() {
        assert!(SessionError::SessionKeyLeaked { user_id: 7 }.is_security_incident());
        assert!(!SessionError::KeyNotLoaded.is_security_incident());
        assert!(!SessionError::Cache("down".to_string()).is_security_incident());
    }

    #[test]
    fn transient_failures_do_not_force_reauthentication() {
        assert!(!SessionError::Persistence("timeout".to_string()).requires_reauthentication());
        assert!(!SessionError::Cache("timeout".to_string()).requires_reauthentication());
        assert!(SessionError::Cipher("tag mismatch".to_string()).requires_reauthentication());
        assert!(SessionError::NoSessionKey { session_id: 1 }.requires_reauthentication());
    }

    #[test]
    fn driver_errors_keep_their_source() {
        use std::error::Error as _;

        let redis = redis::RedisError::from((redis::ErrorKind::ResponseError, "bad reply"));
        let e = SessionError::from(redis);
        assert!(matches!(e, SessionError::Redis(_)));
        assert!(e.source().is_some());
        assert!(!e.requires_reauthentication());
    }

    #[test]
    fn leak_message_names_the_user() {
        let e = SessionError::SessionKeyLeaked { user_id: 1000 };
        assert_eq!(
            e.to_string(),
            "session key has been leaked to the cache for user 1000"
        );
    }
}
