//! Registration, login, and profile endpoints.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_common::{UserProfile, VigilError};

use super::{ApiError, ClientId};
use crate::auth::{LoginRequest, RegisterRequest};
use crate::state::AppState;

#[derive(Serialize)]
pub struct RegisterResponse {
    success: bool,
    user_id: u64,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let user = state.flow.register(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            user_id: user.id,
        }),
    ))
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    expires_at: DateTime<Utc>,
    user_id: u64,
    username: String,
    country: Option<String>,
    region: Option<String>,
    profile: String,
}

/// Guarded login: lock window, CAPTCHA gate, credentials, session
pub async fn login(
    State(state): State<AppState>,
    ClientId(client_id): ClientId,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let now = state.guard.now();
    let success = state.flow.login(&client_id, &payload, now).await?;

    let user = success.user;

    Ok(Json(LoginResponse {
        token: success.session.token,
        expires_at: success.session.expires_at,
        user_id: user.id,
        username: user.username,
        country: user.country,
        region: user.region,
        profile: user.profile,
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, ApiError> {
    let token = bearer_token(&headers)?;
    let profile = state.flow.profile(token, state.guard.now()).await?;
    Ok(Json(profile))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)?;
    state.flow.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Extract the token from `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Result<&str, VigilError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| VigilError::Unauthorized("No or malformed token".to_string()))?;

    let token = header.trim();
    if token.is_empty() {
        return Err(VigilError::Unauthorized("Token missing".to_string()));
    }
    Ok(token)
}
