//! Escalation policy and eviction rules.

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};

use super::GuardEntry;
use crate::config::GuardConfig;

/// Tunable lockout and challenge policy
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Lock duration per failure count; index `n - 1` applies to the n-th failure
    lock_schedule: Vec<Duration>,
    /// Failure count at which a CAPTCHA becomes mandatory
    pub challenge_threshold: u32,
    /// How long a generated CAPTCHA stays solvable
    pub challenge_validity: Duration,
}

impl GuardPolicy {
    pub fn new(
        lock_schedule: Vec<Duration>,
        challenge_threshold: u32,
        challenge_validity: Duration,
    ) -> Result<Self> {
        if lock_schedule.is_empty() {
            bail!("lock schedule must contain at least one duration");
        }
        if lock_schedule.iter().any(|d| *d < Duration::zero()) {
            bail!("lock schedule durations must not be negative");
        }
        if lock_schedule.windows(2).any(|w| w[1] < w[0]) {
            bail!("lock schedule must be non-decreasing");
        }
        if challenge_threshold == 0 {
            bail!("challenge threshold must be at least 1");
        }
        if challenge_validity <= Duration::zero() {
            bail!("challenge validity must be positive");
        }

        Ok(Self {
            lock_schedule,
            challenge_threshold,
            challenge_validity,
        })
    }

    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        Self::new(
            config
                .lock_schedule_secs
                .iter()
                .map(|&secs| secs_to_duration(secs))
                .collect(),
            config.challenge_threshold,
            secs_to_duration(config.challenge_validity_secs),
        )
    }

    /// Lock duration for the given failure count, clamped at the last entry
    pub fn lock_duration(&self, failure_count: u32) -> Duration {
        let idx = (failure_count.max(1) as usize - 1).min(self.lock_schedule.len() - 1);
        self.lock_schedule[idx]
    }

    pub fn requires_challenge(&self, failure_count: u32) -> bool {
        failure_count >= self.challenge_threshold
    }
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            lock_schedule: vigil_common::constants::DEFAULT_LOCK_SCHEDULE_SECS
                .iter()
                .map(|&secs| secs_to_duration(secs))
                .collect(),
            challenge_threshold: vigil_common::constants::DEFAULT_CHALLENGE_THRESHOLD,
            challenge_validity: secs_to_duration(
                vigil_common::constants::DEFAULT_CHALLENGE_VALIDITY_SECS,
            ),
        }
    }
}

pub(crate) fn secs_to_duration(secs: u64) -> Duration {
    Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
}

/// Decides which idle guard entries the sweeper may drop
pub trait EvictionPolicy: Send + Sync {
    fn should_evict(&self, entry: &GuardEntry, now: DateTime<Utc>) -> bool;
}

/// Drops entries whose lock ended more than `retention` ago and that carry no
/// live challenge.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub retention: Duration,
}

impl RetentionPolicy {
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }
}

impl EvictionPolicy for RetentionPolicy {
    fn should_evict(&self, entry: &GuardEntry, now: DateTime<Utc>) -> bool {
        if entry.has_live_challenge(now) {
            return false;
        }
        match &entry.attempt {
            Some(attempt) => attempt
                .locked_until
                .checked_add_signed(self.retention)
                .is_some_and(|expiry| expiry <= now),
            None => true,
        }
    }
}
