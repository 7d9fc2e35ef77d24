use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::password;
use crate::error::Result;

/// The per-session password that unlocks a session's service key.
///
/// Lives in memory and in the durable `session_key` table only. The column
/// holds the decoded bytes; in memory the key is the base64 password string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    /// Equal to the owning session's id.
    #[zeroize(skip)]
    #[serde(rename = "_id")]
    pub id: i64,
    /// The base64 encoded session password.
    #[serde(rename = "_key")]
    pub key: String,
    /// Mirrors the session's expiration.
    #[zeroize(skip)]
    pub expiration: DateTime<Utc>,
}

impl SessionKey {
    /// Creates a new `SessionKey`.
    pub fn new(id: i64, key: String, expiration: DateTime<Utc>) -> Self {
        Self { id, key, expiration }
    }

    /// Rebuilds a key from the raw bytes stored in the durable store.
    pub fn from_raw(id: i64, raw: &[u8], expiration: DateTime<Utc>) -> Self {
        let key = password::encode_password(raw);
        Self::new(id, key.as_str().to_owned(), expiration)
    }

    /// The raw password bytes, as written to the durable store.
    pub fn decoded(&self) -> Result<Zeroizing<Vec<u8>>> {
        password::decode_password(&self.key)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}
