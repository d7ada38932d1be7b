use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::device::parse_user_agent;
use crate::storage::models::{Credentials, SessionState, SignIn, User};
use crate::AppState;

/// Last path segment that addresses the caller's own session
const OWN_SESSION: &str = "mine";

// ============================================================================
// Handlers
// ============================================================================

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(credentials): AppJson<Credentials>,
) -> Result<(StatusCode, HeaderMap, Json<JSend<User>>), ApiError> {
    let accounts = state
        .accounts
        .clone()
        .ok_or_else(|| ApiError::unavailable("sign-in is not enabled"))?;

    let user = accounts.verify_credentials(&credentials).await?;

    let sessions = state.sessions.clone();
    let session_state = SessionState::new(user.clone());
    let (token, response_headers) = tokio::task::spawn_blocking(move || {
        let mut response_headers = HeaderMap::new();
        sessions
            .begin(&session_state, &mut response_headers)
            .map(|token| (token, response_headers))
    })
    .await
    .map_err(|e| ApiError::internal(format!("Session task failed: {e}")))??;

    tracing::info!(token_id = %token.id(), user_id = user.id, "User signed in");

    let sign_in = SignIn {
        device_info: parse_user_agent(&headers),
        ip: client_ip(&headers),
        sign_in_time: Utc::now(),
        user_id: user.id,
    };
    if let Err(e) = accounts.record_sign_in(&sign_in).await {
        tracing::warn!(error = %e, user_id = user.id, "Failed to record sign-in");
    }

    Ok((StatusCode::CREATED, response_headers, JSend::success(user)))
}

pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<JSend<&'static str>>, ApiError> {
    if id != OWN_SESSION {
        return Err(ApiError::forbidden("you may only end your own session"));
    }

    // Credentials come from headers and the query string; the body is never read
    let (parts, _body) = request.into_parts();
    let request = axum::http::Request::from_parts(parts, ());

    let sessions = state.sessions.clone();
    let token = tokio::task::spawn_blocking(move || sessions.end(&request))
        .await
        .map_err(|e| ApiError::internal(format!("Session task failed: {e}")))??;

    tracing::info!(token_id = %token.id(), "User signed out");
    Ok(JSend::success("signed out"))
}

/// First `X-Forwarded-For` entry, which is the client as seen by the outermost proxy.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .map(str::to_string)
}
