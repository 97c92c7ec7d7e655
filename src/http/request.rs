//! Request correlation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Echo it on the response for client-side correlation
//!
//! # Design Decisions
//! - IDs are always generated here; inbound `X-Request-Id` is ignored so
//!   every ID stays unique
//! - The ID is the only request-derived value that reaches the logs

use std::fmt;

use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;

/// Response header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation ID for one request/response cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attach the request ID header to a response.
pub trait RequestIdExt {
    fn with_request_id(self, id: &RequestId) -> Self;
}

impl RequestIdExt for Response {
    fn with_request_id(mut self, id: &RequestId) -> Self {
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            self.headers_mut().insert(X_REQUEST_ID, value);
        }
        self
    }
}
