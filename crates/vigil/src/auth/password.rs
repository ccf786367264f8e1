//! Password policy and Argon2id hashing.

use std::sync::LazyLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use vigil_common::VigilError;
use vigil_common::constants::{MAX_USERNAME_LEN, MIN_PASSWORD_LEN, PASSWORD_SPECIALS};

/// Verified against when the username is unknown, so both failure paths cost
/// one Argon2 verification.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("vigil-dummy-password").unwrap_or_default());

/// Enforce the password strength policy.
///
/// At least eight characters drawn from letters, digits, and `@$!%*?&`, with
/// at least one of each class.
pub fn validate_password(password: &str) -> Result<(), VigilError> {
    let weak = |reason: &str| Err(VigilError::WeakPassword(reason.to_string()));

    if password.chars().count() < MIN_PASSWORD_LEN {
        return weak("must be at least 8 characters");
    }
    if !password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c))
    {
        return weak("only letters, digits and @$!%*?& are allowed");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return weak("needs a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return weak("needs an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return weak("needs a digit");
    }
    if !password.chars().any(|c| PASSWORD_SPECIALS.contains(c)) {
        return weak("needs one of @$!%*?&");
    }

    Ok(())
}

/// Trim and check a username. Returns the trimmed form.
pub fn validate_username(username: &str) -> Result<&str, VigilError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(VigilError::InvalidInput("username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(VigilError::InvalidInput(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(VigilError::InvalidInput(
            "username must not contain spaces".to_string(),
        ));
    }
    Ok(username)
}

/// Hash a password into a PHC string
pub fn hash_password(password: &str) -> Result<String, VigilError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VigilError::Internal(format!("Failed to hash password: {e}")))
}

/// Check a password against a stored PHC string
pub fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        tracing::error!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Spend the same effort as a real verification and report failure
pub fn verify_against_dummy(password: &str) -> bool {
    let _ = verify_password(password, &DUMMY_HASH);
    false
}
