//! Configuration management for Vigil.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;

use vigil_common::constants::{
    DEFAULT_CAPTCHA_LENGTH, DEFAULT_CAPTCHA_NOISE, DEFAULT_CHALLENGE_THRESHOLD,
    DEFAULT_CHALLENGE_VALIDITY_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_LOCK_SCHEDULE_SECS,
    DEFAULT_REDIS_URL, DEFAULT_RETENTION_SECS, DEFAULT_SESSION_TTL_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};

use crate::guard::GuardPolicy;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Where users and sessions live
    #[serde(default)]
    pub storage: StorageBackend,

    /// Header carrying the real client address when behind a proxy.
    /// The socket peer address is used when unset.
    #[serde(default)]
    pub client_id_header: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// This node's unique ID (auto-generated if not set)
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// Login defense policy
    #[serde(default)]
    pub guard: GuardConfig,

    /// CAPTCHA rendering
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Session issuance
    #[serde(default)]
    pub session: SessionConfig,
}

/// Backing store for users and sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Redis,
    Memory,
}

/// Lockout and challenge policy
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Lock duration per failure count, clamped at the last entry
    #[serde(default = "default_lock_schedule")]
    pub lock_schedule_secs: Vec<u64>,

    /// Failure count at which a CAPTCHA becomes mandatory
    #[serde(default = "default_challenge_threshold")]
    pub challenge_threshold: u32,

    /// CAPTCHA validity in seconds
    #[serde(default = "default_challenge_validity")]
    pub challenge_validity_secs: u64,

    /// Sweeper period in seconds (0 disables the sweeper)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long an expired lock is remembered before eviction
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lock_schedule_secs: default_lock_schedule(),
            challenge_threshold: default_challenge_threshold(),
            challenge_validity_secs: default_challenge_validity(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
        }
    }
}

/// CAPTCHA-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    /// Characters per puzzle
    #[serde(default = "default_captcha_length")]
    pub length: usize,

    /// Noise curves per puzzle
    #[serde(default = "default_captcha_noise")]
    pub noise: usize,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            length: default_captcha_length(),
            noise: default_captcha_noise(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session token validity in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_request_timeout() -> u64 { 10 }
fn default_lock_schedule() -> Vec<u64> { DEFAULT_LOCK_SCHEDULE_SECS.to_vec() }
fn default_challenge_threshold() -> u32 { DEFAULT_CHALLENGE_THRESHOLD }
fn default_challenge_validity() -> u64 { DEFAULT_CHALLENGE_VALIDITY_SECS }
fn default_sweep_interval() -> u64 { DEFAULT_SWEEP_INTERVAL_SECS }
fn default_retention() -> u64 { DEFAULT_RETENTION_SECS }
fn default_captcha_length() -> usize { DEFAULT_CAPTCHA_LENGTH }
fn default_captcha_noise() -> usize { DEFAULT_CAPTCHA_NOISE }
fn default_session_ttl() -> u64 { DEFAULT_SESSION_TTL_SECS }

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("node-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(storage) = args.storage {
            config.storage = storage;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the lockout invariants
    pub fn validate(&self) -> Result<()> {
        GuardPolicy::from_config(&self.guard).context("Invalid guard policy")?;

        if self.captcha.length == 0 {
            bail!("captcha.length must be at least 1");
        }
        if self.session.ttl_secs == 0 {
            bail!("session.ttl_secs must be positive");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        if self
            .client_id_header
            .as_deref()
            .is_some_and(|h| axum::http::HeaderName::try_from(h).is_err())
        {
            bail!("client_id_header is not a valid header name");
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            storage: StorageBackend::default(),
            client_id_header: None,
            request_timeout_secs: default_request_timeout(),
            node_id: generate_node_id(),
            guard: GuardConfig::default(),
            captcha: CaptchaConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guard.lock_schedule_secs, vec![300, 900, 1800, 3600]);
        assert_eq!(config.guard.challenge_threshold, 2);
        assert_eq!(config.guard.challenge_validity_secs, 120);
        assert_eq!(config.storage, StorageBackend::Redis);
    }

    #[test]
    fn test_decreasing_schedule_rejected() {
        let mut config = AppConfig::default();
        config.guard.lock_schedule_secs = vec![900, 300];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                storage = "memory"
                client_id_header = "X-Forwarded-For"

                [guard]
                lock_schedule_secs = [60, 120]
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.guard.lock_schedule_secs, vec![60, 120]);
        assert_eq!(config.guard.challenge_threshold, 2);
        assert_eq!(config.captcha.length, 5);
        assert!(config.node_id.starts_with("node-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut config = AppConfig::default();
        config.client_id_header = Some("not a header".to_string());
        assert!(config.validate().is_err());
    }
}
