//! Forwarding of directed requests to upstream targets.
//!
//! Requests and responses are buffered whole; streaming and protocol upgrades
//! are not supported.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::Response;

use crate::api::response::ApiError;
use crate::proxy::Director;
use crate::storage::models::SessionState;

/// Largest request body that will be buffered and forwarded
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// One upstream group as seen by the router
pub struct Upstream {
    pub director: Director<SessionState>,
    pub http_client: reqwest::Client,
}

pub async fn forward(
    State(upstream): State<Arc<Upstream>>,
    request: Request,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    // Before directing, so a client's `Connection` list cannot name the identity headers
    strip_hop_by_hop(&mut parts.headers);

    // Session lookups may block on the store
    let directing = Arc::clone(&upstream);
    let (mut parts, dispatch) = tokio::task::spawn_blocking(move || {
        let mut request = axum::http::Request::from_parts(parts, ());
        let dispatch = directing.director.direct(&mut request);
        (request.into_parts().0, dispatch)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Director task failed: {e}")))?;
    let dispatch = dispatch.map_err(|e| {
        tracing::error!(group = upstream.director.group(), error = %e, "Failed to direct request");
        ApiError::internal("failed to direct request")
    })?;

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {e}")))?;

    parts.headers.remove(header::CONTENT_LENGTH);

    let target = &upstream.director.targets()[dispatch.target];
    let response = upstream
        .http_client
        .request(parts.method, parts.uri.to_string())
        .headers(parts.headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(group = upstream.director.group(), target = %target, error = %e, "Upstream request failed");
            ApiError::bad_gateway("upstream unavailable")
        })?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);

    let bytes = response.bytes().await.map_err(|e| {
        tracing::warn!(group = upstream.director.group(), target = %target, error = %e, "Failed to read upstream response");
        ApiError::bad_gateway("upstream response could not be read")
    })?;

    let mut relayed = Response::new(Body::from(bytes));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    Ok(relayed)
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
