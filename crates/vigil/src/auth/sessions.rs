//! Bearer session issuance and lookup.
//!
//! Tokens are 32 random bytes, URL-safe base64. Only the SHA-256 digest of a
//! token is stored, so a leaked store does not leak usable tokens.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use vigil_common::constants::redis_keys;
use vigil_common::{SessionToken, VigilError};

use super::users::store_err;

/// Issues and resolves session tokens
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn issue(&self, user_id: u64, now: DateTime<Utc>) -> Result<SessionToken, VigilError>;

    /// Owning user of a live token
    async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<Option<u64>, VigilError>;

    async fn revoke(&self, token: &str) -> Result<(), VigilError>;

    /// Drop expired sessions. Returns how many were removed.
    async fn sweep(&self, _now: DateTime<Utc>) -> Result<usize, VigilError> {
        Ok(0)
    }
}

/// Generate a cryptographically secure session token
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Process-local session store
pub struct MemorySessionStore {
    sessions: DashMap<String, (u64, DateTime<Utc>)>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn issue(&self, user_id: u64, now: DateTime<Utc>) -> Result<SessionToken, VigilError> {
        let token = generate_token();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.sessions
            .insert(token_digest(&token), (user_id, expires_at));

        Ok(SessionToken {
            token,
            user_id,
            expires_at,
        })
    }

    async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<Option<u64>, VigilError> {
        let digest = token_digest(token);
        if let Some(session) = self.sessions.get(&digest) {
            let (user_id, expires_at) = *session;
            if now < expires_at {
                return Ok(Some(user_id));
            }
        }
        self.sessions
            .remove_if(&digest, |_, (_, expires_at)| now >= *expires_at);
        Ok(None)
    }

    async fn revoke(&self, token: &str) -> Result<(), VigilError> {
        self.sessions.remove(&token_digest(token));
        Ok(())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, VigilError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, (_, expires_at)| now < *expires_at);
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

/// Redis-backed session store; expiry is delegated to key TTLs, so the
/// default no-op sweep applies
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn key(token: &str) -> String {
        format!("{}{}", redis_keys::SESSION_PREFIX, token_digest(token))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn issue(&self, user_id: u64, now: DateTime<Utc>) -> Result<SessionToken, VigilError> {
        let token = generate_token();
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(Self::key(&token), user_id, self.ttl_secs)
            .await
            .map_err(store_err)?;

        Ok(SessionToken {
            token,
            user_id,
            expires_at: now
                .checked_add_signed(crate::guard::secs_to_duration(self.ttl_secs))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }

    async fn resolve(&self, token: &str, _now: DateTime<Utc>) -> Result<Option<u64>, VigilError> {
        let mut conn = self.redis.clone();
        conn.get(Self::key(token)).await.map_err(store_err)
    }

    async fn revoke(&self, token: &str) -> Result<(), VigilError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::key(token)).await.map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token_digest(&a), a);
    }

    #[tokio::test]
    async fn test_issue_resolve_revoke() {
        let store = MemorySessionStore::new(Duration::days(7));
        let now = Utc::now();
        let session = store.issue(42, now).await.unwrap();
        assert_eq!(session.expires_at, now + Duration::days(7));

        assert_eq!(store.resolve(&session.token, now).await.unwrap(), Some(42));
        assert_eq!(store.resolve("bogus", now).await.unwrap(), None);

        store.revoke(&session.token).await.unwrap();
        assert_eq!(store.resolve(&session.token, now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_sessions_do_not_resolve() {
        let store = MemorySessionStore::new(Duration::minutes(1));
        let now = Utc::now();
        let session = store.issue(1, now).await.unwrap();

        let later = now + Duration::minutes(1);
        assert_eq!(store.resolve(&session.token, later).await.unwrap(), None);
        // Gone for good, even with an earlier clock
        assert_eq!(store.resolve(&session.token, now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_drops_unresolved_expired_sessions() {
        let store = MemorySessionStore::new(Duration::minutes(10));
        let now = Utc::now();
        let stale = store.issue(1, now).await.unwrap();
        let fresh = store.issue(2, now + Duration::minutes(5)).await.unwrap();

        assert_eq!(store.sweep(now + Duration::minutes(9)).await.unwrap(), 0);
        assert_eq!(store.sweep(now + Duration::minutes(10)).await.unwrap(), 1);

        let later = now + Duration::minutes(11);
        assert_eq!(store.resolve(&fresh.token, later).await.unwrap(), Some(2));
        assert_eq!(store.resolve(&stale.token, now).await.unwrap(), None);
    }
}
