//! Shared constants for Vigil components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

/// Default escalation schedule: 5, 15, 30, then 60 minutes
pub const DEFAULT_LOCK_SCHEDULE_SECS: [u64; 4] = [300, 900, 1800, 3600];

/// Failure count at which a CAPTCHA becomes mandatory
pub const DEFAULT_CHALLENGE_THRESHOLD: u32 = 2;

/// How long a generated CAPTCHA stays solvable (2 minutes)
pub const DEFAULT_CHALLENGE_VALIDITY_SECS: u64 = 120;

/// How often the background sweeper runs
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// How long an unlocked attempt record is kept after its lock expires (1 hour)
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Retry hint for an attempt rejected because another one is still running
pub const IN_FLIGHT_RETRY_SECS: i64 = 1;

/// Session token validity (7 days)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 3600;

/// Characters in a generated CAPTCHA
pub const DEFAULT_CAPTCHA_LENGTH: usize = 5;

/// Noise lines drawn over a generated CAPTCHA
pub const DEFAULT_CAPTCHA_NOISE: usize = 3;

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 32;

/// Shortest accepted password
pub const MIN_PASSWORD_LEN: usize = 8;

/// Special characters accepted (and one of which is required) in passwords
pub const PASSWORD_SPECIALS: &str = "@$!%*?&";

/// Redis key prefixes
pub mod redis_keys {
    /// User record: user:{id}
    pub const USER_PREFIX: &str = "vigil:user:";

    /// Username index: username:{username} -> id
    pub const USERNAME_PREFIX: &str = "vigil:username:";

    /// Monotonic user id counter
    pub const USER_ID_SEQ: &str = "vigil:user_id_seq";

    /// Session: session:{sha256(token)} -> user id
    pub const SESSION_PREFIX: &str = "vigil:session:";
}

/// HTTP header names
pub mod headers {
    /// Common forwarding header set by reverse proxies
    pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";
}
