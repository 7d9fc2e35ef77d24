//! Short-lived user sessions that wrap a durable service key.
//!
//! A session's metadata lives in a volatile, TTL-bounded cache (Redis) keyed
//! by user id. The random session password that decrypts the session's
//! service key lives only in a durable store (PostgreSQL). The cache is the
//! less trusted of the two: a cached session found carrying its key is
//! treated as a leak and destroyed.
//!
//! ```no_run
//! use session_vault::{Config, SessionState, TraceContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! session_vault::telemetry::init_tracing();
//!
//! let config = Config::from_env()?;
//! let state = SessionState::new(&config).await?;
//! let ctx = TraceContext::new("login");
//!
//! let mut session = state
//!     .sessions
//!     .issue(1, 1000, "svc-secret-abc", state.expiration_from_now())?;
//! state.sessions.store(&ctx, &mut session).await?;
//!
//! if let Some(session) = state.sessions.load(&ctx, 1000).await? {
//!     let secret = state.sessions.recover_secret(&session)?;
//!     assert_eq!(secret.as_str(), "svc-secret-abc");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod state;
pub mod telemetry;

pub mod crypto {
    pub mod aes;
    pub mod cipher;
    pub mod password;
}

pub mod models {
    pub mod session;
    pub mod session_key;
}

pub mod repositories {
    pub mod memory;
    pub mod session_cache;
    pub mod session_key;
}

pub mod services {
    pub mod session;
}

pub use config::{CipherConfig, Config};
pub use context::TraceContext;
pub use crypto::cipher::SecretCipher;
pub use error::{Result, SessionError};
pub use models::session::{CachedSession, LeakedKey, LeakedPayload, Session};
pub use models::session_key::SessionKey;
pub use repositories::memory::{MemoryKeyStore, MemorySessionCache};
pub use repositories::session_cache::{RedisSessionCache, VolatileSessionCache};
pub use repositories::session_key::{DurableKeyStore, PgKeyStore, Publish};
pub use services::session::SessionManager;
pub use state::SessionState;
