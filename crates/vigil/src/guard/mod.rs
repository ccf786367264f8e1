//! Login defense guard.
//!
//! Tracks failed logins per client identifier, escalates lock windows along a
//! configured schedule, and injects a CAPTCHA once the failure count reaches
//! the challenge threshold.
//!
//! ```text
//! Clean ──fail──> Warned ──fail──> Challenged ──fail──> Challenged (longer lock, new CAPTCHA)
//!   ^                │                  │
//!   └────success─────┴──────success─────┘
//! ```
//!
//! All state for one identifier lives in a single map entry, so every
//! operation runs under that entry's shard lock. Identifiers in other shards
//! never contend.
//!
//! A login holds an [`AttemptSlot`] from admission until its outcome is
//! recorded. Only one attempt per identifier can be in flight, so parallel
//! requests cannot all slip through before the first failure lands.

mod clock;
mod policy;
mod sweeper;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use policy::{EvictionPolicy, GuardPolicy, RetentionPolicy};
pub(crate) use policy::secs_to_duration;
pub use sweeper::sweeper_worker;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use vigil_common::constants::IN_FLIGHT_RETRY_SECS;
use vigil_common::{ChallengeOutcome, ClientStatus, Decision, GuardSnapshot};

use crate::captcha::{ChallengePrompt, PuzzleSource};

/// Consecutive failures for one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Failures since the last successful login
    pub failure_count: u32,
    /// Attempts are rejected while `now < locked_until`
    pub locked_until: DateTime<Utc>,
}

/// Pending CAPTCHA for one client
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    /// Lower-cased solution text
    pub expected_answer: String,
    /// Rendered SVG puzzle
    pub svg: String,
    /// Void at or after this instant
    pub expires_at: DateTime<Utc>,
}

impl ChallengeRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Everything the guard knows about one client identifier
#[derive(Debug, Clone, Default)]
pub struct GuardEntry {
    pub attempt: Option<AttemptRecord>,
    pub challenge: Option<ChallengeRecord>,
    /// Id of the attempt currently between admission and outcome
    pub in_flight: Option<u64>,
}

impl GuardEntry {
    pub fn has_live_challenge(&self, now: DateTime<Utc>) -> bool {
        self.challenge.as_ref().is_some_and(|c| c.is_live(now))
    }

    fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.attempt.as_ref().is_some_and(|a| now < a.locked_until)
    }

    fn is_vacant(&self) -> bool {
        self.attempt.is_none() && self.challenge.is_none() && self.in_flight.is_none()
    }
}

/// Exclusive right to run one login attempt for an identifier.
///
/// Released on drop, including when the request is cancelled.
#[must_use]
pub struct AttemptSlot<'a> {
    guard: &'a Guard,
    identifier: String,
    id: u64,
}

impl Drop for AttemptSlot<'_> {
    fn drop(&mut self) {
        self.guard.release(&self.identifier, self.id);
    }
}

/// The login brute-force guard
pub struct Guard {
    entries: DashMap<String, GuardEntry>,
    policy: GuardPolicy,
    clock: Arc<dyn Clock>,
    puzzles: Arc<dyn PuzzleSource>,
    eviction: Arc<dyn EvictionPolicy>,
    next_slot: AtomicU64,
}

impl Guard {
    pub fn new(
        policy: GuardPolicy,
        clock: Arc<dyn Clock>,
        puzzles: Arc<dyn PuzzleSource>,
        eviction: Arc<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            clock,
            puzzles,
            eviction,
            next_slot: AtomicU64::new(0),
        }
    }

    /// Current time according to the injected clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Decide whether a login attempt may proceed. Never mutates state.
    pub fn admit(&self, identifier: &str, now: DateTime<Utc>) -> Decision {
        let Some(entry) = self.entries.get(identifier) else {
            return Decision::Proceed;
        };

        match &entry.attempt {
            Some(attempt) if now < attempt.locked_until => Decision::Blocked {
                retry_after: attempt.locked_until - now,
            },
            _ => Decision::Proceed,
        }
    }

    /// Admit an attempt and reserve the identifier until the slot is dropped.
    ///
    /// Blocked while a lock is active or while another attempt for the same
    /// identifier is still in flight.
    pub fn begin_attempt(&self, identifier: &str, now: DateTime<Utc>) -> Result<AttemptSlot<'_>, Decision> {
        let mut entry = self.entries.entry(identifier.to_string()).or_default();

        if let Some(attempt) = entry.attempt.as_ref().filter(|a| now < a.locked_until) {
            return Err(Decision::Blocked {
                retry_after: attempt.locked_until - now,
            });
        }
        if entry.in_flight.is_some() {
            tracing::debug!(client_id = %identifier, "Concurrent login attempt rejected");
            return Err(Decision::Blocked {
                retry_after: Duration::seconds(IN_FLIGHT_RETRY_SECS),
            });
        }

        let id = self.next_slot.fetch_add(1, Ordering::Relaxed);
        entry.in_flight = Some(id);

        Ok(AttemptSlot {
            guard: self,
            identifier: identifier.to_string(),
            id,
        })
    }

    fn release(&self, identifier: &str, id: u64) {
        let vacant = match self.entries.get_mut(identifier) {
            Some(mut entry) if entry.in_flight == Some(id) => {
                entry.in_flight = None;
                entry.is_vacant()
            }
            _ => false,
        };
        if vacant {
            self.entries.remove_if(identifier, |_, entry| entry.is_vacant());
        }
    }

    /// The prompt of a live challenge, if the client must solve one.
    pub fn challenge_for(&self, identifier: &str, now: DateTime<Utc>) -> Option<ChallengePrompt> {
        let entry = self.entries.get(identifier)?;
        entry
            .challenge
            .as_ref()
            .filter(|c| c.is_live(now))
            .map(|c| ChallengePrompt {
                svg: c.svg.clone(),
                expires_at: c.expires_at,
            })
    }

    /// Issue a fresh challenge for a client at or above the threshold,
    /// replacing any pending one. `None` for clients below the threshold.
    pub fn refresh_challenge(&self, identifier: &str, now: DateTime<Utc>) -> Option<ChallengePrompt> {
        let mut entry = self.entries.get_mut(identifier)?;
        let failure_count = entry.attempt.as_ref()?.failure_count;
        if !self.policy.requires_challenge(failure_count) {
            return None;
        }

        let challenge = self.new_challenge(now);
        let prompt = ChallengePrompt {
            svg: challenge.svg.clone(),
            expires_at: challenge.expires_at,
        };
        entry.challenge = Some(challenge);

        tracing::debug!(client_id = %identifier, "CAPTCHA refreshed");
        Some(prompt)
    }

    /// Check an answer against the pending challenge.
    ///
    /// Expired challenges are discarded, correct answers consume the
    /// challenge, wrong answers leave it in place. The attempt record is
    /// never touched here.
    pub fn check_challenge(
        &self,
        identifier: &str,
        answer: &str,
        now: DateTime<Utc>,
    ) -> ChallengeOutcome {
        let Some(mut entry) = self.entries.get_mut(identifier) else {
            return ChallengeOutcome::Missing;
        };

        let outcome = match &entry.challenge {
            None => return ChallengeOutcome::Missing,
            Some(challenge) if !challenge.is_live(now) => ChallengeOutcome::Expired,
            Some(challenge) if normalize_answer(answer) == challenge.expected_answer => {
                ChallengeOutcome::Passed
            }
            Some(_) => ChallengeOutcome::Incorrect,
        };

        if matches!(outcome, ChallengeOutcome::Passed | ChallengeOutcome::Expired) {
            entry.challenge = None;
        }

        tracing::debug!(client_id = %identifier, outcome = ?outcome, "CAPTCHA checked");
        outcome
    }

    /// Fail-closed boolean form of [`Guard::check_challenge`].
    pub fn verify_challenge(&self, identifier: &str, answer: &str, now: DateTime<Utc>) -> bool {
        self.check_challenge(identifier, answer, now) == ChallengeOutcome::Passed
    }

    /// Register a failed credential check and escalate the lock.
    ///
    /// Returns the updated attempt record.
    pub fn record_failure(&self, identifier: &str, now: DateTime<Utc>) -> AttemptRecord {
        let mut entry = self.entries.entry(identifier.to_string()).or_default();

        let failure_count = entry
            .attempt
            .as_ref()
            .map_or(0, |a| a.failure_count)
            .saturating_add(1);
        let lock = self.policy.lock_duration(failure_count);
        let attempt = AttemptRecord {
            failure_count,
            locked_until: add_clamped(now, lock),
        };
        entry.attempt = Some(attempt.clone());

        if self.policy.requires_challenge(failure_count) {
            entry.challenge = Some(self.new_challenge(now));
            tracing::warn!(
                client_id = %identifier,
                failure_count,
                locked_until = %attempt.locked_until,
                "Login failures reached challenge threshold, CAPTCHA issued"
            );
        } else {
            tracing::info!(
                client_id = %identifier,
                failure_count,
                locked_until = %attempt.locked_until,
                "Failed login recorded"
            );
        }

        attempt
    }

    /// Forget everything about a client after a genuine credential success.
    pub fn record_success(&self, identifier: &str) {
        if self.entries.remove(identifier).is_some() {
            tracing::debug!(client_id = %identifier, "Guard state cleared after successful login");
        }
    }

    fn new_challenge(&self, now: DateTime<Utc>) -> ChallengeRecord {
        let puzzle = self.puzzles.generate();
        ChallengeRecord {
            expected_answer: normalize_answer(&puzzle.answer),
            svg: puzzle.svg,
            expires_at: add_clamped(now, self.policy.challenge_validity),
        }
    }

    /// Where a client currently sits in the state machine
    pub fn status(&self, identifier: &str) -> ClientStatus {
        let Some(entry) = self.entries.get(identifier) else {
            return ClientStatus::Clean;
        };
        match &entry.attempt {
            None => ClientStatus::Clean,
            Some(a) if self.policy.requires_challenge(a.failure_count) => ClientStatus::Challenged,
            Some(_) => ClientStatus::Warned,
        }
    }

    /// Counters for monitoring
    pub fn snapshot(&self, now: DateTime<Utc>) -> GuardSnapshot {
        let mut snapshot = GuardSnapshot::default();
        for entry in self.entries.iter() {
            snapshot.tracked_clients += 1;
            if entry.is_locked(now) {
                snapshot.locked_clients += 1;
            }
            if entry.has_live_challenge(now) {
                snapshot.live_challenges += 1;
            }
        }
        snapshot
    }

    /// Drop expired challenges and evict idle entries. Returns entries removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.in_flight.is_some() {
                return true;
            }
            if entry.challenge.as_ref().is_some_and(|c| !c.is_live(now)) {
                entry.challenge = None;
            }
            let keep = !self.eviction.should_evict(entry, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of identifiers with state on record
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Answers compare trimmed and case-insensitively
fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

fn add_clamped(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
