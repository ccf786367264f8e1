//! Registered users, keyed by case-insensitive username.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use vigil_common::constants::redis_keys;
use vigil_common::{UserProfile, VigilError};

/// Stored user, including the password hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub birthdate: Option<String>,
    pub profile: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Public view without the password hash
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            country: self.country.clone(),
            region: self.region.clone(),
            birthdate: self.birthdate.clone(),
            profile: self.profile.clone().unwrap_or_default(),
        }
    }
}

/// A user about to be inserted
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub birthdate: Option<String>,
}

impl NewUser {
    fn into_record(self, id: u64, created_at: DateTime<Utc>) -> UserRecord {
        UserRecord {
            id,
            username: self.username,
            password_hash: self.password_hash,
            country: self.country,
            region: self.region,
            birthdate: self.birthdate,
            profile: None,
            created_at,
        }
    }
}

/// Persistence for user accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; fails with `UsernameTaken` if the name is in use
    async fn insert(&self, user: NewUser) -> Result<UserRecord, VigilError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, VigilError>;

    async fn find_by_id(&self, id: u64) -> Result<Option<UserRecord>, VigilError>;

    /// Is the backing store reachable?
    async fn ping(&self) -> Result<(), VigilError>;
}

fn username_key(username: &str) -> String {
    username.to_lowercase()
}

/// Process-local user store
#[derive(Default)]
pub struct MemoryUserStore {
    by_name: DashMap<String, UserRecord>,
    names_by_id: DashMap<u64, String>,
    next_id: AtomicU64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: NewUser) -> Result<UserRecord, VigilError> {
        match self.by_name.entry(username_key(&user.username)) {
            Entry::Occupied(_) => Err(VigilError::UsernameTaken),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                let record = user.into_record(id, Utc::now());
                self.names_by_id.insert(id, slot.key().clone());
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, VigilError> {
        Ok(self
            .by_name
            .get(&username_key(username))
            .map(|r| r.value().clone()))
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<UserRecord>, VigilError> {
        let Some(name) = self.names_by_id.get(&id).map(|n| n.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_name.get(&name).map(|r| r.value().clone()))
    }

    async fn ping(&self) -> Result<(), VigilError> {
        Ok(())
    }
}

/// Redis-backed user store
///
/// Layout: `vigil:username:{lowercase name}` -> id (claimed with SETNX),
/// `vigil:user:{id}` -> JSON record, `vigil:user_id_seq` -> last id.
#[derive(Clone)]
pub struct RedisUserStore {
    redis: ConnectionManager,
}

impl RedisUserStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

pub(crate) fn store_err(e: impl std::fmt::Display) -> VigilError {
    VigilError::Store(e.to_string())
}

#[async_trait]
impl UserStore for RedisUserStore {
    async fn insert(&self, user: NewUser) -> Result<UserRecord, VigilError> {
        let mut conn = self.redis.clone();
        let name_key = format!("{}{}", redis_keys::USERNAME_PREFIX, username_key(&user.username));

        let id: u64 = conn
            .incr(redis_keys::USER_ID_SEQ, 1)
            .await
            .map_err(store_err)?;

        let claimed: bool = conn.set_nx(&name_key, id).await.map_err(store_err)?;
        if !claimed {
            return Err(VigilError::UsernameTaken);
        }

        let record = user.into_record(id, Utc::now());
        let data = serde_json::to_string(&record).map_err(|e| VigilError::Internal(e.to_string()))?;
        let user_key = format!("{}{}", redis_keys::USER_PREFIX, id);

        if let Err(e) = conn.set::<_, _, ()>(&user_key, &data).await {
            // Release the name so the user can retry
            let _: Result<(), _> = conn.del(&name_key).await;
            return Err(store_err(e));
        }

        Ok(record)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, VigilError> {
        let mut conn = self.redis.clone();
        let name_key = format!("{}{}", redis_keys::USERNAME_PREFIX, username_key(username));
        let id: Option<u64> = conn.get(&name_key).await.map_err(store_err)?;

        match id {
            Some(id) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<UserRecord>, VigilError> {
        let mut conn = self.redis.clone();
        let user_key = format!("{}{}", redis_keys::USER_PREFIX, id);
        let data: Option<String> = conn.get(&user_key).await.map_err(store_err)?;

        data.map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| VigilError::Internal(format!("Corrupt user record {id}: {e}")))
    }

    async fn ping(&self) -> Result<(), VigilError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            password_hash: "$argon2id$fake".to_string(),
            country: Some("MA".to_string()),
            region: None,
            birthdate: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = MemoryUserStore::new();
        let alice = store.insert(new_user("alice")).await.unwrap();
        let bob = store.insert(new_user("bob")).await.unwrap();
        assert_eq!(alice.id, 1);
        assert_eq!(bob.id, 2);
    }

    #[tokio::test]
    async fn test_usernames_are_unique_case_insensitively() {
        let store = MemoryUserStore::new();
        store.insert(new_user("Alice")).await.unwrap();
        let err = store.insert(new_user("aLiCe")).await.unwrap_err();
        assert!(matches!(err, VigilError::UsernameTaken));
    }

    #[tokio::test]
    async fn test_lookup_by_name_and_id() {
        let store = MemoryUserStore::new();
        let inserted = store.insert(new_user("Alice")).await.unwrap();

        let by_name = store.find_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(by_name.id, inserted.id);
        assert_eq!(by_name.username, "Alice");

        let by_id = store.find_by_id(inserted.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "Alice");

        assert!(store.find_by_username("carol").await.unwrap().is_none());
        assert!(store.find_by_id(99).await.unwrap().is_none());
        tokio_test::assert_ok!(store.ping().await);
    }

    #[test]
    fn test_profile_hides_hash() {
        let record = new_user("alice").into_record(7, Utc::now());
        let json = serde_json::to_string(&record.profile()).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"profile\":\"\""));
        assert!(json.contains("\"country\":\"MA\""));
    }
}
