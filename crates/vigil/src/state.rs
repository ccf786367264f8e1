//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{
    LoginFlow, MemorySessionStore, MemoryUserStore, RedisSessionStore, RedisUserStore,
    SessionStore, UserStore,
};
use crate::captcha::{PuzzleSource, SvgPuzzleSource};
use crate::config::{AppConfig, StorageBackend};
use crate::guard::{Clock, Guard, GuardPolicy, RetentionPolicy, SystemClock, secs_to_duration};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Login defense guard
    pub guard: Arc<Guard>,

    /// Login / register / profile flows
    pub flow: Arc<LoginFlow>,

    /// Node identifier, reported in stats
    pub node_id: String,

    /// Process start, for uptime
    pub started_at: Instant,
}

impl AppState {
    /// Create application state, connecting to Redis when configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        let (users, sessions): (Arc<dyn UserStore>, Arc<dyn SessionStore>) = match config.storage
        {
            StorageBackend::Redis => {
                // Connect to Redis with connection manager (handles reconnection)
                let client = redis::Client::open(config.redis_url.as_str())
                    .context("Failed to create Redis client")?;
                let redis = ConnectionManager::new(client)
                    .await
                    .context("Failed to connect to Redis")?;

                (
                    Arc::new(RedisUserStore::new(redis.clone())),
                    Arc::new(RedisSessionStore::new(redis, config.session.ttl_secs)),
                )
            }
            StorageBackend::Memory => (
                Arc::new(MemoryUserStore::new()),
                Arc::new(MemorySessionStore::new(secs_to_duration(config.session.ttl_secs))),
            ),
        };

        let puzzles = Arc::new(SvgPuzzleSource::new(config.captcha.length, config.captcha.noise));
        Self::with_parts(config, Arc::new(SystemClock), puzzles, users, sessions)
    }

    /// Assemble state from explicit collaborators
    pub fn with_parts(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        puzzles: Arc<dyn PuzzleSource>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let policy = GuardPolicy::from_config(&config.guard)?;
        let eviction = Arc::new(RetentionPolicy::new(secs_to_duration(config.guard.retention_secs)));
        let guard = Arc::new(Guard::new(policy, clock, puzzles, eviction));
        let flow = Arc::new(LoginFlow::new(guard.clone(), users, sessions));
        let node_id = config.node_id.clone();

        Ok(Self {
            config,
            guard,
            flow,
            node_id,
            started_at: Instant::now(),
        })
    }
}
