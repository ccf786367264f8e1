//! CAPTCHA image endpoint.

use axum::{
    extract::{Query, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use vigil_common::VigilError;

use super::{ApiError, ClientId};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CaptchaQuery {
    /// Replace the pending challenge with a new one
    #[serde(default)]
    refresh: bool,
}

/// Serve the caller's pending CAPTCHA as SVG.
///
/// A challenged client whose CAPTCHA has lapsed (or who asks for
/// `?refresh=true`) gets a fresh one. Clients below the threshold get 404.
pub async fn captcha_image(
    State(state): State<AppState>,
    ClientId(client_id): ClientId,
    Query(params): Query<CaptchaQuery>,
) -> Result<Response, ApiError> {
    let guard = &state.guard;
    let now = guard.now();

    let pending = if params.refresh {
        None
    } else {
        guard.challenge_for(&client_id, now)
    };
    let prompt = pending
        .or_else(|| guard.refresh_challenge(&client_id, now))
        .ok_or_else(|| VigilError::NotFound("No CAPTCHA pending for this client".to_string()))?;

    tracing::debug!(client_id = %client_id, expires_at = %prompt.expires_at, "Serving CAPTCHA");

    Ok((
        [(CONTENT_TYPE, "image/svg+xml"), (CACHE_CONTROL, "no-store")],
        prompt.svg,
    )
        .into_response())
}
