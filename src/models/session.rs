use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::password;
use crate::error::{SessionError, Result};
use crate::models::session_key::SessionKey;

/// Represents a user session.
///
/// ⚠️ IMPORTANT: `encrypted_service_key` is the service key ENCRYPTED with
/// the session key. The session key itself must NEVER reach the cache:
/// `session_key` is only populated in memory, after [`Session`] has been
/// read back from the cache and its key loaded from the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The session id, shared with its durable key row.
    #[serde(rename = "_id")]
    pub id: i64,
    /// The ID of the user this session belongs to.
    pub user_id: i64,
    /// The timestamp when the session was created.
    pub started: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expiration: DateTime<Utc>,
    /// Base64 frame produced by [`crate::SecretCipher::encrypt`].
    pub encrypted_service_key: String,
    /// The key that decrypts `encrypted_service_key`, when loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
}

/// What a cache entry turned out to hold.
#[derive(Debug)]
pub enum CachedSession {
    /// A key-less session, as written by [`crate::SessionManager::store`].
    Clean(Session),
    /// A payload carrying a non-null `session_key` field, in whatever shape.
    Leaked(LeakedPayload),
}

/// The readable parts of a payload that carried a session key.
#[derive(Debug)]
pub struct LeakedPayload {
    /// The payload's session id, if it could be read.
    pub session_id: Option<i64>,
    /// The payload's user id, if it could be read.
    pub user_id: Option<i64>,
    /// The leaked key, if its id and password could be read.
    pub key: Option<LeakedKey>,
}

/// Key material recovered from a leaked payload.
pub struct LeakedKey {
    /// The id of the key row it claims to be.
    pub id: i64,
    /// The decoded password bytes.
    pub raw: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for LeakedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakedKey")
            .field("id", &self.id)
            .field("raw", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct KeyPresence {
    #[serde(default)]
    session_key: Option<IgnoredAny>,
}

#[derive(Deserialize)]
struct PayloadIds {
    #[serde(rename = "_id")]
    id: i64,
    user_id: i64,
}

#[derive(Deserialize)]
struct KeyField {
    session_key: KeyShape,
}

/// A session key as written by this crate or under its exported field names.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyShape {
    #[zeroize(skip)]
    #[serde(rename = "_id", alias = "ID")]
    id: i64,
    #[serde(rename = "_key", alias = "Key")]
    key: String,
}

impl LeakedKey {
    fn read(bytes: &[u8]) -> Option<Self> {
        let field: KeyField = sonic_rs::from_slice(bytes).ok()?;
        let raw = password::decode_password(field.session_key.key.trim_end_matches('=')).ok()?;
        Some(Self {
            id: field.session_key.id,
            raw,
        })
    }
}

impl Session {
    /// Serializes the session for the volatile cache.
    ///
    /// Refuses to encode a session that still carries its key.
    pub fn to_cache_bytes(&self) -> Result<Vec<u8>> {
        if self.session_key.is_some() {
            return Err(SessionError::Cache(format!(
                "refusing to cache session {} with its session key attached",
                self.id
            )));
        }

        sonic_rs::to_vec(self)
            .map_err(|e| SessionError::Cache(format!("Session serialization failed: {}", e)))
    }

    /// Decodes a cached session payload.
    pub fn from_cache_bytes(bytes: &[u8]) -> Result<Self> {
        sonic_rs::from_slice(bytes).map_err(|e| {
            SessionError::CacheCorruption(format!("failed to decode cached session: {}", e))
        })
    }

    /// Decodes a cache entry, telling key-less sessions apart from payloads
    /// that carry a key.
    ///
    /// Any present, non-null `session_key` counts as a leak, even when the
    /// rest of the payload does not decode.
    pub fn decode_cached(bytes: &[u8]) -> Result<CachedSession> {
        let presence: KeyPresence = sonic_rs::from_slice(bytes).map_err(|e| {
            SessionError::CacheCorruption(format!("failed to decode cached session: {}", e))
        })?;

        if presence.session_key.is_none() {
            return Self::from_cache_bytes(bytes).map(CachedSession::Clean);
        }

        let ids: Option<PayloadIds> = sonic_rs::from_slice(bytes).ok();
        Ok(CachedSession::Leaked(LeakedPayload {
            session_id: ids.as_ref().map(|ids| ids.id),
            user_id: ids.as_ref().map(|ids| ids.user_id),
            key: LeakedKey::read(bytes),
        }))
    }

    /// Time left until `expiration`, or `None` once it has passed.
    pub fn time_to_live(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expiration - now)
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(with_key: bool) -> Session {
        let expiration = Utc::now() + Duration::hours(1);
        Session {
            id: 69,
            user_id: 420,
            started: Utc::now(),
            expiration,
            encrypted_service_key: "ciphertext".to_string(),
            session_key: with_key
                .then(|| SessionKey::new(69, "cGFzc3dvcmQ".to_string(), expiration)),
        }
    }

    #[test]
    fn cache_payload_omits_the_key_field() {
        let bytes = session(false).to_cache_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["_id"], 69);
        assert_eq!(value["user_id"], 420);
        assert_eq!(value["encrypted_service_key"], "ciphertext");
        assert!(value.get("session_key").is_none());
    }

    #[test]
    fn keyed_session_is_never_encoded_for_the_cache() {
        assert!(matches!(
            session(true).to_cache_bytes(),
            Err(SessionError::Cache(_))
        ));
    }

    #[test]
    fn leaked_payload_decodes_with_its_key() {
        let leaked = serde_json::to_vec(&session(true)).unwrap();
        let decoded = Session::from_cache_bytes(&leaked).unwrap();
        assert_eq!(decoded.session_key.map(|k| k.id), Some(69));
    }

    #[test]
    fn clean_payload_is_not_a_leak() {
        let bytes = session(false).to_cache_bytes().unwrap();
        match Session::decode_cached(&bytes).unwrap() {
            CachedSession::Clean(s) => {
                assert_eq!(s.id, 69);
                assert!(s.session_key.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        let null_key = br#"{"_id":1,"user_id":2,"started":"2024-01-01T00:00:00Z","expiration":"2024-01-01T01:00:00Z","encrypted_service_key":"c","session_key":null}"#;
        assert!(matches!(
            Session::decode_cached(null_key).unwrap(),
            CachedSession::Clean(_)
        ));
    }

    #[test]
    fn exported_key_shape_is_a_leak() {
        let payload = br#"{"_id":1,"user_id":1000,"started":"2024-01-01T00:00:00Z","expiration":"2024-01-01T01:00:00Z","encrypted_service_key":"c","session_key":{"ID":1,"Key":"c2VjcmV0","Expiration":"2024-01-01T01:00:00Z"}}"#;

        let CachedSession::Leaked(leaked) = Session::decode_cached(payload).unwrap() else {
            panic!("key in foreign shape was not reported");
        };
        assert_eq!(leaked.session_id, Some(1));
        assert_eq!(leaked.user_id, Some(1000));
        let key = leaked.key.unwrap();
        assert_eq!(key.id, 1);
        assert_eq!(key.raw.as_slice(), b"secret");
    }

    #[test]
    fn unreadable_key_is_still_a_leak() {
        let payload = br#"{"user_id":"x","session_key":{"partial":true}}"#;

        let CachedSession::Leaked(leaked) = Session::decode_cached(payload).unwrap() else {
            panic!("partial key was not reported");
        };
        assert!(leaked.session_id.is_none());
        assert!(leaked.key.is_none());
    }

    #[test]
    fn garbage_payload_is_corruption() {
        assert!(matches!(
            Session::from_cache_bytes(b"{not json"),
            Err(SessionError::CacheCorruption(_))
        ));
        assert!(matches!(
            Session::decode_cached(b"{not json"),
            Err(SessionError::CacheCorruption(_))
        ));
    }

    #[test]
    fn ttl_is_none_after_expiration() {
        let mut s = session(false);
        assert!(s.time_to_live(Utc::now()).is_some());

        s.expiration = Utc::now() - Duration::seconds(1);
        assert!(s.time_to_live(Utc::now()).is_none());
    }
}
