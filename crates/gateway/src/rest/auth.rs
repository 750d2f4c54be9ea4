//! Authentication REST endpoints.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{FieldError, GatewayError, GatewayResult};
use crate::state::GatewayState;
use crate::websocket::chat::session_cookie;
use crate::websocket::SESSION_COOKIE;

pub const USERNAME_MIN_LENGTH: usize = 3;
pub const USERNAME_MAX_LENGTH: usize = 16;
pub const PASSWORD_MAX_LENGTH: usize = 128;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub username: String,
}

/// Create authentication routes.
pub fn create_auth_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
}

pub async fn register(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> GatewayResult<Response> {
    validate_credentials(&payload.username, &payload.password)?;

    let user = state
        .authenticator
        .register(&payload.username, &payload.password)
        .await?;

    // A fresh registration lands on an authenticated session, reusing
    // the caller's token when one is presented.
    let token = ensure_session(&state, &headers).await?;
    state
        .authenticator
        .sessions()
        .set_identity(&token, &user.username)
        .await
        .map_err(murmur_auth::AuthError::from)?;

    Ok(session_response(token, user.username))
}

pub async fn login(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> GatewayResult<Response> {
    let token = ensure_session(&state, &headers).await?;
    let identity = state
        .authenticator
        .login(&payload.username, &payload.password, &token)
        .await?;

    Ok(session_response(token, identity))
}

pub async fn logout(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> GatewayResult<Response> {
    let token = request_token(&headers)
        .ok_or_else(|| GatewayError::AuthenticationFailed("no active session".to_string()))?;

    state.authenticator.logout(&token).await?;

    let clear_cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_cookie)],
    )
        .into_response())
}

/// Field-level validation for the registration surface.
fn validate_credentials(username: &str, password: &str) -> GatewayResult<()> {
    let mut fields = Vec::new();

    let length = username.chars().count();
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length) {
        fields.push(FieldError::new(
            "username",
            format!("username must be {USERNAME_MIN_LENGTH}-{USERNAME_MAX_LENGTH} characters"),
        ));
    } else if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        fields.push(FieldError::new(
            "username",
            "username can only contain letters, numbers, underscores, and hyphens",
        ));
    }

    if password.is_empty() {
        fields.push(FieldError::new("password", "password must not be empty"));
    } else if password.chars().count() > PASSWORD_MAX_LENGTH {
        fields.push(FieldError::new(
            "password",
            format!("password must be at most {PASSWORD_MAX_LENGTH} characters"),
        ));
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::Validation(fields))
    }
}

/// Reuse the caller's session token when presented (bearer header or
/// cookie), otherwise open a fresh session.
async fn ensure_session(state: &GatewayState, headers: &HeaderMap) -> GatewayResult<String> {
    if let Some(token) = request_token(headers) {
        if state
            .authenticator
            .sessions()
            .get(&token)
            .await
            .map_err(murmur_auth::AuthError::from)?
            .is_some()
        {
            return Ok(token);
        }
    }

    Ok(state.authenticator.open_session().await?)
}

fn session_response(token: String, username: String) -> Response {
    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly");
    (
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse { token, username }),
    )
        .into_response()
}

/// Pull the session token from the Authorization header or the session
/// cookie.
fn request_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
    {
        let mut parts = value.split_whitespace();
        if parts.next().is_some_and(|s| s.eq_ignore_ascii_case("Bearer")) {
            if let Some(token) = parts.next().filter(|t| !t.is_empty()) {
                return Some(token.to_string());
            }
        }
    }

    session_cookie(headers)
}
