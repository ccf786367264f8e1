//! Core types shared across Vigil components.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of admitting a login attempt for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No active lock, credential verification may run
    Proceed,
    /// An active lock window is in force
    Blocked {
        /// Time left until the lock window closes
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Remaining lock in whole seconds, rounded up (0 when not blocked)
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Self::Proceed => 0,
            Self::Blocked { retry_after } => {
                let millis = retry_after.num_milliseconds().max(0) as u64;
                millis.div_ceil(1000)
            }
        }
    }
}

/// Result of checking a CAPTCHA answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeOutcome {
    /// Answer matched; the challenge has been consumed
    Passed,
    /// No challenge was pending for this client
    Missing,
    /// The challenge expired and has been discarded
    Expired,
    /// Answer did not match; the challenge stays live
    Incorrect,
}

/// Per-client state as seen from outside the guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// No failures on record
    #[default]
    Clean,
    /// Failures recorded, below the challenge threshold
    Warned,
    /// At or above the challenge threshold
    Challenged,
}

/// Point-in-time counters for the guard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSnapshot {
    /// Identifiers with any state on record
    pub tracked_clients: u64,
    /// Identifiers inside an active lock window
    pub locked_clients: u64,
    /// Unexpired challenges waiting for an answer
    pub live_challenges: u64,
}

/// Public view of a registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    /// Profile picture URL, empty when none was uploaded
    #[serde(default)]
    pub profile: String,
}

/// Issued bearer session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    /// Opaque token handed to the client
    pub token: String,
    /// Owning user
    pub user_id: u64,
    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
}
