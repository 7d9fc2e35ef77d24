//! End-to-end checks against live PostgreSQL and Redis.
//!
//! Set `TEST_DATABASE_URL` and `TEST_REDIS_URL` to run them; otherwise each
//! test returns immediately.

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use redis::AsyncCommands;
use session_vault::{CipherConfig, Config, SessionError, SessionState, TraceContext};
use std::sync::atomic::{AtomicI64, Ordering};

// Shared id source so concurrently running tests never collide
static NEXT_ID: Lazy<AtomicI64> = Lazy::new(|| {
    AtomicI64::new(Utc::now().timestamp_micros())
});

fn next_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::SeqCst)
}

fn live_config() -> Option<Config> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let redis_url = std::env::var("TEST_REDIS_URL").ok()?;

    Some(Config {
        database_url,
        database_pool_size: 4,
        redis_url,
        cache_namespace: "session-vault-test".to_string(),
        session_duration_hours: 1,
        cipher: CipherConfig { memory_kib: 1024, iterations: 1, parallelism: 1 },
    })
}

async fn setup() -> Option<SessionState> {
    session_vault::telemetry::init_tracing();

    let Some(config) = live_config() else {
        eprintln!("TEST_DATABASE_URL / TEST_REDIS_URL not set, skipping");
        return None;
    };

    Some(SessionState::new(&config).await.unwrap())
}

async fn key_rows(state: &SessionState, id: i64) -> Vec<Vec<u8>> {
    let client = state.db.get().await.unwrap();
    client
        .query(r#"SELECT "key" FROM session_key WHERE id = $1"#, &[&id])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<_, Vec<u8>>("key"))
        .collect()
}

#[tokio::test]
async fn test_store_load_recover_round_trip() {
    let Some(state) = setup().await else { return };
    let ctx = TraceContext::new("integration");
    let (id, user_id) = (next_id(), next_id());

    let mut session = state
        .sessions
        .issue(id, user_id, "svc-secret-abc", state.expiration_from_now())
        .unwrap();
    state.sessions.store(&ctx, &mut session).await.unwrap();

    let loaded = state.sessions.load(&ctx, user_id).await.unwrap().unwrap();
    assert_eq!(loaded.id, id);
    assert_eq!(loaded.user_id, user_id);
    // TIMESTAMPTZ keeps microseconds, so compare the key material only
    let (loaded_key, issued_key) = (
        loaded.session_key.as_ref().unwrap(),
        session.session_key.as_ref().unwrap(),
    );
    assert_eq!(loaded_key.id, issued_key.id);
    assert_eq!(loaded_key.key, issued_key.key);
    assert_eq!(
        state.sessions.recover_secret(&loaded).unwrap().as_str(),
        "svc-secret-abc"
    );

    let rows = key_rows(&state, id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        session.session_key.as_ref().unwrap().decoded().unwrap().to_vec()
    );

    let mut redis = state.redis.clone();
    let cache_key = state.sessions.cache_key(user_id);
    let cached: Vec<u8> = redis.get(&cache_key).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&cached).unwrap();
    assert!(value.get("session_key").is_none());

    let ttl: i64 = redis.pttl(&cache_key).await.unwrap();
    assert!(ttl > 0 && ttl <= 3_600_000);

    assert!(state.sessions.revoke(&ctx, &loaded).await.unwrap());
    assert!(key_rows(&state, id).await.is_empty());
}

#[tokio::test]
async fn test_leaked_key_is_purged() {
    let Some(state) = setup().await else { return };
    let ctx = TraceContext::new("integration");
    let (id, user_id) = (next_id(), next_id());

    let mut session = state
        .sessions
        .issue(id, user_id, "svc", Utc::now() + Duration::minutes(5))
        .unwrap();
    state.sessions.store(&ctx, &mut session).await.unwrap();

    let mut redis = state.redis.clone();
    let leaked = serde_json::to_vec(&session).unwrap();
    let _: () = redis
        .set_ex(state.sessions.cache_key(user_id), leaked, 300)
        .await
        .unwrap();

    let err = state.sessions.load(&ctx, user_id).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionKeyLeaked { .. }));

    assert!(state.sessions.load(&ctx, user_id).await.unwrap().is_none());
    assert!(key_rows(&state, id).await.is_empty());
}

#[tokio::test]
async fn test_forged_leak_keeps_the_victim_row() {
    let Some(state) = setup().await else { return };
    let ctx = TraceContext::new("integration");
    let (id, victim, attacker) = (next_id(), next_id(), next_id());

    let mut session = state
        .sessions
        .issue(id, victim, "svc", Utc::now() + Duration::minutes(5))
        .unwrap();
    state.sessions.store(&ctx, &mut session).await.unwrap();

    let mut crafted = serde_json::to_value(&session).unwrap();
    crafted["user_id"] = serde_json::json!(attacker);
    crafted["session_key"]["_key"] = serde_json::json!("AAAA");
    let mut redis = state.redis.clone();
    let _: () = redis
        .set_ex(
            state.sessions.cache_key(attacker),
            serde_json::to_vec(&crafted).unwrap(),
            300,
        )
        .await
        .unwrap();

    let err = state.sessions.load(&ctx, attacker).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionKeyLeaked { .. }));

    assert_eq!(key_rows(&state, id).await.len(), 1);
    assert!(state.sessions.load(&ctx, victim).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_session_is_none() {
    let Some(state) = setup().await else { return };
    let ctx = TraceContext::new("integration");

    assert!(state.sessions.load(&ctx, next_id()).await.unwrap().is_none());
}
