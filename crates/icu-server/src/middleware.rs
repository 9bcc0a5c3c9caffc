//! Request pipeline.
//!
//! API routes pass through, outermost first: [`protocol_gate`] →
//! [`auth_gate`] → [`audit_trail`] → handler. Each interceptor either
//! short-circuits with an envelope response or forwards to the next one.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use icu_api::{ApiError, is_write_method, validate_accept, validate_content_type};
use icu_storage::NewAuditLogEntry;

use crate::server::AppState;

pub const UNAUTHORIZED_AUDIT_MESSAGE: &str = "Unauthorized access attempt";
pub const PROCESSED_AUDIT_MESSAGE: &str = "Request processed";

// =============================================================================
// Protocol Gate
// =============================================================================

/// Rejects non-JSON bodies (415) and non-JSON `Accept` (406). Nothing is
/// audited for requests stopped here.
pub async fn protocol_gate(req: Request<Body>, next: Next) -> Response {
    if is_write_method(req.method())
        && let Err(err) = validate_content_type(req.headers())
    {
        tracing::debug!(path = %req.uri().path(), "Rejected request body media type");
        return err.into_response();
    }
    if let Err(err) = validate_accept(req.headers()) {
        tracing::debug!(path = %req.uri().path(), "Rejected Accept header");
        return err.into_response();
    }
    next.run(req).await
}

// =============================================================================
// Auth Gate
// =============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Compares the bearer token with the configured one. A mismatch, a missing
/// header included, is audited as a 401 before responding.
pub async fn auth_gate(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if bearer_token(req.headers()) == Some(state.api_token.as_ref()) {
        return next.run(req).await;
    }

    tracing::debug!(path = %req.uri().path(), "Bearer token missing or invalid");
    let unauthorized = ApiError::unauthorized("Authentication failed");
    let entry = NewAuditLogEntry::new(
        req.uri().path(),
        req.method().as_str(),
        unauthorized.status_code().as_u16(),
        UNAUTHORIZED_AUDIT_MESSAGE,
    );
    record(&state, &entry).await;
    unauthorized.into_response()
}

// =============================================================================
// Audit Trail
// =============================================================================

/// Runs the handler and writes one audit entry with the resulting status.
pub async fn audit_trail(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let endpoint = req.uri().path().to_string();
    let method = req.method().as_str().to_string();

    let res = next.run(req).await;

    let entry = NewAuditLogEntry::new(
        endpoint,
        method,
        res.status().as_u16(),
        PROCESSED_AUDIT_MESSAGE,
    );
    record(&state, &entry).await;
    res
}

async fn record(state: &AppState, entry: &NewAuditLogEntry) {
    if let Err(e) = state.service.record_audit(entry).await {
        tracing::warn!(
            error = %e,
            endpoint = %entry.endpoint,
            status = entry.status,
            "Failed to write audit log entry"
        );
    }
}

// =============================================================================
// Other Middleware
// =============================================================================

/// Request id carried in request extensions for span construction.
#[derive(Debug, Clone)]
pub struct RequestId(pub HeaderValue);

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => match HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            Ok(value) => value,
            Err(_) => return next.run(req).await,
        },
    };

    req.extensions_mut().insert(RequestId(req_id_value.clone()));

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}
