//! Error taxonomy for the request pipeline.
//!
//! Every error the proxy generates itself is rendered as the standard JSON
//! body `{"error":{"code","details","message"},"request"}`. Upstream error
//! statuses are not represented here; the dispatcher forwards those verbatim.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use thiserror::Error;

/// Errors produced while processing a proxied request. Configuration errors
/// are not represented: they are fatal before serving and exit the process.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("could not parse proxy request: {0}")]
    Parse(String),

    #[error("referrer not allowed: {0}")]
    ReferrerDenied(String),

    #[error("no matching upstream rule for: {0}")]
    NoRuleMatch(String),

    #[error("rate limit exceeded for: {0}")]
    RateExceeded(String),

    #[error("credential acquisition failed: {0}")]
    Credential(String),

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("rate meter state corrupt: {0}")]
    RateMeter(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Parse(_) | ProxyError::ReferrerDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::NoRuleMatch(_) => StatusCode::NOT_FOUND,
            ProxyError::RateExceeded(_) => StatusCode::from_u16(420).unwrap(),
            ProxyError::Credential(_)
            | ProxyError::UpstreamTransport(_)
            | ProxyError::RateMeter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render this error as the standard JSON body.
    pub fn to_response(&self, request_url: &str) -> Response {
        error_response(self.status_code(), &self.to_string(), request_url)
    }
}

/// Build the standard JSON error body with an explicit status code.
pub fn error_response(status: StatusCode, message: &str, request_url: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": status.as_u16(),
            "details": message,
            "message": message,
        },
        "request": request_url,
    });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
