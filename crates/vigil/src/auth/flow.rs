//! The login and registration flows.
//!
//! Login composes three independent stages:
//! 1. the [`Guard`] (lock window and CAPTCHA gate),
//! 2. the [`CredentialVerifier`] (user lookup + Argon2 check),
//! 3. the [`SessionStore`] (token issuance).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use vigil_common::{ChallengeOutcome, ClientStatus, Decision, SessionToken, UserProfile, VigilError};

use super::password;
use super::sessions::SessionStore;
use super::users::{NewUser, UserRecord, UserStore};
use crate::guard::Guard;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// CAPTCHA answer, required once the client has been challenged
    #[serde(default)]
    pub captcha: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub birthdate: Option<String>,
}

/// A completed login
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub session: SessionToken,
    pub user: UserProfile,
}

/// Looks users up and checks their passwords
pub struct CredentialVerifier {
    users: Arc<dyn UserStore>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// The matching user, or `None` for an unknown user or wrong password.
    ///
    /// Both failure paths run one Argon2 verification.
    pub async fn verify(&self, username: &str, password: &str) -> Result<Option<UserRecord>, VigilError> {
        let user = self.users.find_by_username(username.trim()).await?;
        let hash = user.as_ref().map(|u| u.password_hash.clone());
        let password = password.to_string();

        let matched = tokio::task::spawn_blocking(move || match hash {
            Some(hash) => password::verify_password(&password, &hash),
            None => password::verify_against_dummy(&password),
        })
        .await
        .map_err(|e| VigilError::Internal(format!("Password verification task failed: {e}")))?;

        Ok(user.filter(|_| matched))
    }
}

/// Authentication entry point shared by the HTTP handlers
pub struct LoginFlow {
    guard: Arc<Guard>,
    users: Arc<dyn UserStore>,
    credentials: CredentialVerifier,
    sessions: Arc<dyn SessionStore>,
}

impl LoginFlow {
    pub fn new(guard: Arc<Guard>, users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            guard,
            credentials: CredentialVerifier::new(users.clone()),
            users,
            sessions,
        }
    }

    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Run a login attempt for `client_id`
    pub async fn login(
        &self,
        client_id: &str,
        request: &LoginRequest,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess, VigilError> {
        let decision = self.guard.admit(client_id, now);
        if decision.is_blocked() {
            return Err(blocked(decision));
        }

        // Held until the outcome is recorded
        let _slot = self.guard.begin_attempt(client_id, now).map_err(blocked)?;

        self.pass_challenge(client_id, request.captcha.as_deref(), now)?;

        let Some(user) = self
            .credentials
            .verify(&request.username, &request.password)
            .await?
        else {
            self.guard.record_failure(client_id, now);
            return Err(VigilError::InvalidCredentials);
        };

        self.guard.record_success(client_id);
        let session = self.sessions.issue(user.id, now).await?;

        tracing::info!(client_id = %client_id, user_id = user.id, "User logged in");

        Ok(LoginSuccess {
            session,
            user: user.profile(),
        })
    }

    /// Challenged clients must present a correct answer to a live CAPTCHA
    fn pass_challenge(
        &self,
        client_id: &str,
        answer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), VigilError> {
        if self.guard.status(client_id) != ClientStatus::Challenged {
            return Ok(());
        }

        let answer = answer.map(str::trim).unwrap_or_default();
        if answer.is_empty() {
            return Err(VigilError::ChallengeRequired);
        }

        match self.guard.check_challenge(client_id, answer, now) {
            ChallengeOutcome::Passed => Ok(()),
            ChallengeOutcome::Missing => Err(VigilError::ChallengeRequired),
            ChallengeOutcome::Expired => Err(VigilError::ChallengeExpired),
            ChallengeOutcome::Incorrect => Err(VigilError::ChallengeIncorrect),
        }
    }

    /// Create a new account
    pub async fn register(&self, request: RegisterRequest) -> Result<UserRecord, VigilError> {
        let username = password::validate_username(&request.username)?.to_string();
        password::validate_password(&request.password)?;

        if self.users.find_by_username(&username).await?.is_some() {
            return Err(VigilError::UsernameTaken);
        }

        let plain = request.password;
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
            .await
            .map_err(|e| VigilError::Internal(format!("Password hashing task failed: {e}")))??;

        let user = self
            .users
            .insert(NewUser {
                username,
                password_hash,
                country: non_empty(request.country),
                region: non_empty(request.region),
                birthdate: non_empty(request.birthdate),
            })
            .await?;

        tracing::info!(user_id = user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Profile of the user owning a bearer token
    pub async fn profile(&self, token: &str, now: DateTime<Utc>) -> Result<UserProfile, VigilError> {
        let user_id = self
            .sessions
            .resolve(token, now)
            .await?
            .ok_or_else(|| VigilError::Unauthorized("Invalid token".to_string()))?;

        self.users
            .find_by_id(user_id)
            .await?
            .map(|u| u.profile())
            .ok_or_else(|| VigilError::NotFound("User not found".to_string()))
    }

    /// End a session
    pub async fn logout(&self, token: &str) -> Result<(), VigilError> {
        self.sessions.revoke(token).await
    }
}

fn blocked(decision: Decision) -> VigilError {
    VigilError::Blocked {
        retry_after_secs: decision.retry_after_secs(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
