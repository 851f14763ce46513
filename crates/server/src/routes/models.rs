//! `GET /v1/models`: passthrough to the provider's model listing.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

/// Not copied from the upstream reply; the body is re-framed locally.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let upstream = state
        .client
        .list_models(auth)
        .await
        .map_err(|e| ServerError::Upstream(e.to_string()))?;
    debug!(status = upstream.status, body_len = upstream.body.len(), "models passthrough");

    let status = StatusCode::from_u16(upstream.status)
        .map_err(|e| ServerError::Internal(format!("upstream status {}: {e}", upstream.status)))?;
    let mut resp = Response::new(Body::from(upstream.body));
    *resp.status_mut() = status;
    for (name, value) in upstream.headers {
        if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            resp.headers_mut().append(n, v);
        }
    }
    Ok(resp)
}
