//! HTTP route handlers for Vigil.

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use vigil_common::VigilError;

use crate::state::AppState;

mod auth;
mod captcha;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/stats", get(health::stats))

        // Accounts
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/profile", get(auth::profile))

        // CAPTCHA for challenged clients
        .route("/captcha-image", get(captcha::captcha_image))

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout))
                .layer(CorsLayer::permissive()),
        )
        // Add shared state
        .with_state(state)
}

/// The key guard state is scoped by.
///
/// Taken from the configured forwarding header when present, otherwise from
/// the socket peer address. Only the last hop is used: it is the one appended
/// by the proxy in front of us, everything left of it is client supplied.
pub struct ClientId(pub String);

impl FromRequestParts<AppState> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(header) = state.config.client_id_header.as_deref() {
            let forwarded = parts
                .headers
                .get(header)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit(',').map(str::trim).find(|hop| !hop.is_empty()));
            if let Some(hop) = forwarded {
                return Ok(Self(hop.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(peer))
    }
}

/// HTTP face of [`VigilError`]
#[derive(Debug)]
pub struct ApiError(pub VigilError);

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %err, code = err.code(), "Request failed");
        }

        let mut body = serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
        });
        if err.is_challenge() {
            body["captcha_url"] = "/captcha-image".into();
        }

        let mut response = (status, Json(body)).into_response();
        if let VigilError::Blocked { retry_after_secs } = err {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemorySessionStore, MemoryUserStore};
    use crate::captcha::FixedPuzzleSource;
    use crate::config::{AppConfig, StorageBackend};
    use crate::guard::ManualClock;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;
    use vigil_common::constants::headers::X_FORWARDED_FOR;

    const PASSWORD: &str = "Str0ng!pw";

    fn app() -> (Router, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let config = AppConfig {
            storage: StorageBackend::Memory,
            client_id_header: Some(X_FORWARDED_FOR.to_string()),
            ..AppConfig::default()
        };
        let state = AppState::with_parts(
            config,
            clock.clone(),
            Arc::new(FixedPuzzleSource::new("h7KpQ")),
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemorySessionStore::new(chrono::Duration::days(7))),
        )
        .unwrap();
        (create_router(state), clock)
    }

    fn post_json(uri: &str, client: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(X_FORWARDED_FOR, client)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_as(uri: &str, client: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(X_FORWARDED_FOR, client)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_alice(app: &Router) {
        let response = app
            .clone()
            .oneshot(post_json(
                "/register",
                "10.0.0.1",
                json!({"username": "alice", "password": PASSWORD, "country": "MA"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    fn login_body(password: &str) -> Value {
        json!({"username": "alice", "password": password})
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app.clone().oneshot(get_as("/health", "1.1.1.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");

        let response = app.oneshot(get_as("/ready", "1.1.1.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_login_profile() {
        let (app, _) = app();
        register_alice(&app).await;

        let response = app
            .clone()
            .oneshot(post_json("/login", "10.0.0.2", login_body(PASSWORD)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["user_id"], 1);
        assert_eq!(body["username"], "alice");
        assert_eq!(body["country"], "MA");
        assert_eq!(body["region"], Value::Null);
        assert_eq!(body["profile"], "");
        assert!(body.get("id").is_none());
        let token = body["token"].as_str().unwrap().to_string();

        let request = Request::builder()
            .uri("/profile")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["username"], "alice");

        let response = app.oneshot(get_as("/profile", "10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_failed_login_then_retry_after() {
        let (app, clock) = app();
        register_alice(&app).await;

        let response = app
            .clone()
            .oneshot(post_json("/login", "9.9.9.9", login_body("Wr0ng!pw")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "invalid_credentials");

        clock.advance(chrono::Duration::seconds(30));
        let response = app
            .clone()
            .oneshot(post_json("/login", "9.9.9.9", login_body(PASSWORD)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "270");
        assert_eq!(body_json(response).await["code"], "blocked");

        // Another address is unaffected
        let response = app
            .oneshot(post_json("/login", "8.8.8.8", login_body(PASSWORD)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_spoofed_forwarded_hops_share_one_lock() {
        let (app, _) = app();
        register_alice(&app).await;

        let mut statuses = Vec::new();
        for i in 0..5 {
            let forwarded = format!("7.7.7.{i}, 6.6.6.6");
            let response = app
                .clone()
                .oneshot(post_json("/login", &forwarded, login_body("Wr0ng!pw")))
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(statuses[0], StatusCode::BAD_REQUEST);
        assert!(statuses[1..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_captcha_flow_over_http() {
        let (app, clock) = app();
        register_alice(&app).await;
        let ip = "192.0.2.10";

        let response = app.clone().oneshot(get_as("/captcha-image", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(post_json("/login", ip, login_body("bad")))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        app.clone()
            .oneshot(post_json("/login", ip, login_body("bad")))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(15));

        let response = app
            .clone()
            .oneshot(post_json("/login", ip, login_body(PASSWORD)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "challenge_required");
        assert_eq!(body["captcha_url"], "/captcha-image");

        let response = app.clone().oneshot(get_as("/captcha-image", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/svg+xml");

        let response = app
            .clone()
            .oneshot(post_json(
                "/login",
                ip,
                json!({"username": "alice", "password": PASSWORD, "captcha": "H7KPQ"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_as("/stats", ip)).await.unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["tracked_clients"], 0);
    }

    #[tokio::test]
    async fn test_register_conflict_and_weak_password() {
        let (app, _) = app();
        register_alice(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/register",
                "10.0.0.1",
                json!({"username": "Alice", "password": PASSWORD}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(post_json(
                "/register",
                "10.0.0.1",
                json!({"username": "bob", "password": "weak"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "weak_password");
    }

    #[tokio::test]
    async fn test_client_id_sources() {
        let state = {
            let config = AppConfig {
                storage: StorageBackend::Memory,
                client_id_header: Some(X_FORWARDED_FOR.to_string()),
                ..AppConfig::default()
            };
            AppState::with_parts(
                config,
                Arc::new(ManualClock::at_epoch()),
                Arc::new(FixedPuzzleSource::new("abcde")),
                Arc::new(MemoryUserStore::new()),
                Arc::new(MemorySessionStore::new(chrono::Duration::days(1))),
            )
            .unwrap()
        };

        let extract = |request: Request<()>| {
            let state = state.clone();
            async move {
                let (mut parts, _) = request.into_parts();
                let ClientId(id) = ClientId::from_request_parts(&mut parts, &state).await.unwrap();
                id
            }
        };

        let forwarded = Request::builder()
            .header(X_FORWARDED_FOR, "203.0.113.5, 10.0.0.1 , ")
            .body(())
            .unwrap();
        assert_eq!(extract(forwarded).await, "10.0.0.1");

        let mut direct = Request::builder().body(()).unwrap();
        direct
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 4], 5555))));
        assert_eq!(extract(direct).await, "198.51.100.4");

        assert_eq!(extract(Request::builder().body(()).unwrap()).await, "unknown");
    }
}
