//! Error taxonomy for Vigil components.

use thiserror::Error;

/// Errors surfaced to clients of the login service
#[derive(Debug, Error)]
pub enum VigilError {
    /// Attempt made inside an active lock window
    #[error("Too many failed attempts, retry in {} minute(s)", .retry_after_secs.div_ceil(60))]
    Blocked { retry_after_secs: u64 },

    /// A CAPTCHA is pending and no answer was supplied
    #[error("CAPTCHA required")]
    ChallengeRequired,

    /// The supplied CAPTCHA answer was wrong
    #[error("CAPTCHA incorrect")]
    ChallengeIncorrect,

    /// The pending CAPTCHA expired before it was answered
    #[error("CAPTCHA expired")]
    ChallengeExpired,

    /// Unknown user or wrong password (deliberately indistinguishable)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Password does not meet the strength policy
    #[error("Weak password: {0}")]
    WeakPassword(String),

    /// Username already registered
    #[error("Username already taken")]
    UsernameTaken,

    /// Missing, malformed, or expired bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing store (Redis) unavailable or failing
    #[error("Store error: {0}")]
    Store(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Blocked { .. } => 429,
            Self::ChallengeRequired | Self::ChallengeIncorrect | Self::ChallengeExpired => 400,
            Self::InvalidCredentials => 400,
            Self::WeakPassword(_) => 400,
            Self::UsernameTaken => 409,
            Self::Unauthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Store(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Machine-readable kind, so clients can re-render a CAPTCHA prompt
    pub fn code(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::ChallengeRequired => "challenge_required",
            Self::ChallengeIncorrect => "challenge_incorrect",
            Self::ChallengeExpired => "challenge_expired",
            Self::InvalidCredentials => "invalid_credentials",
            Self::WeakPassword(_) => "weak_password",
            Self::UsernameTaken => "username_taken",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Store(_) => "store_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// True for the CAPTCHA family of errors
    pub fn is_challenge(&self) -> bool {
        matches!(
            self,
            Self::ChallengeRequired | Self::ChallengeIncorrect | Self::ChallengeExpired
        )
    }
}
