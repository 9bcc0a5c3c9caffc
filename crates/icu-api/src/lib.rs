//! API types for the ICU intake service.
//!
//! Every response, success or failure, is rendered as the same JSON envelope:
//!
//! ```json
//! { "status": 200, "message": "Data found", "data": { ... } }
//! ```
//!
//! `data` is omitted when there is nothing to return. `status` always mirrors
//! the HTTP status code of the response.

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only media type accepted on the wire.
pub const JSON_MEDIA_TYPE: &str = "application/json";

// -------------------------
// Response Envelope
// -------------------------

/// Uniform JSON envelope returned by every route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
            data,
        }
    }
}

/// High-level API errors mapped to HTTP statuses and rendered as an [`Envelope`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not acceptable: {0}")]
    NotAcceptable(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn not_acceptable(msg: impl Into<String>) -> Self {
        Self::NotAcceptable(msg.into())
    }
    pub fn unsupported_media_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(msg.into())
    }
    pub fn gateway_timeout(msg: impl Into<String>) -> Self {
        Self::GatewayTimeout(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The human-readable message carried in the envelope.
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::NotAcceptable(msg)
            | ApiError::UnsupportedMediaType(msg)
            | ApiError::GatewayTimeout(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    pub fn to_envelope(&self) -> Envelope<()> {
        Envelope::new(self.status_code(), self.message(), None)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = json_response(status, &self.to_envelope());
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

// -------------------------
// Success Responses
// -------------------------

#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: StatusCode,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// `200 OK` with a data payload.
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// `200 OK` without a data payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let envelope = Envelope::new(self.status, self.message, self.data);
        json_response(self.status, &envelope)
    }
}

fn json_response<T: Serialize>(status: StatusCode, envelope: &Envelope<T>) -> Response {
    let body = match serde_json::to_vec(envelope) {
        Ok(b) => b,
        Err(_) => {
            let fallback: Envelope<()> = Envelope::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Serialization failure",
                None,
            );
            serde_json::to_vec(&fallback).unwrap_or_else(|_| b"{}".to_vec())
        }
    };

    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_MEDIA_TYPE),
    );
    response
}

// -------------------------
// Content Negotiation
// -------------------------

/// Returns `true` for methods that carry a request body.
pub fn is_write_method(method: &Method) -> bool {
    method == Method::POST || method == Method::PUT || method == Method::PATCH
}

/// Matches a header value against `application/json` byte for byte, ignoring
/// surrounding whitespace. Parameters and case variants are rejected.
fn is_json_media_type(value: &HeaderValue) -> bool {
    value
        .to_str()
        .is_ok_and(|raw| raw.trim() == JSON_MEDIA_TYPE)
}

/// The Accept header must name exactly `application/json`.
pub fn validate_accept(headers: &HeaderMap) -> Result<(), ApiError> {
    let accepted = headers
        .get(header::ACCEPT)
        .is_some_and(is_json_media_type);
    if accepted {
        Ok(())
    } else {
        Err(ApiError::not_acceptable(
            "Accept header must be application/json",
        ))
    }
}

/// The Content-Type header must name exactly `application/json`.
pub fn validate_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let accepted = headers
        .get(header::CONTENT_TYPE)
        .is_some_and(is_json_media_type);
    if accepted {
        Ok(())
    } else {
        Err(ApiError::unsupported_media_type(
            "Content-Type must be application/json",
        ))
    }
}
