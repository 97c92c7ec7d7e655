//! Response handling and transformation.
//!
//! # Responsibilities
//! - Define the client-facing error taxonomy
//! - Render every failure as the `{"error": {...}}` envelope
//! - Map provider OAuth error codes to HTTP status codes
//!
//! # Design Decisions
//! - One envelope for every failure; no raw upstream bodies or panics leak
//! - Request ID included whenever one has been assigned
//! - Upstream timeouts result in 504 Gateway Timeout

use std::fmt;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::http::request::RequestId;

/// Error kinds reported to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    MethodNotAllowed,
    InvalidContentType,
    PayloadTooLarge,
    InvalidJson,
    InvalidCodeType,
    InvalidCodeFormat,
    ConfigurationError,
    ServiceUnavailable,
    GatewayTimeout,
    BadGateway,
    InternalServerError,
    NotFound,
    /// OAuth error code reported by the provider, passed through verbatim.
    Provider(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::InvalidContentType => "INVALID_CONTENT_TYPE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::InvalidCodeType => "INVALID_CODE_TYPE",
            ErrorCode::InvalidCodeFormat => "INVALID_CODE_FORMAT",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorCode::BadGateway => "BAD_GATEWAY",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Provider(code) => code,
        }
    }

    /// Status for the fixed kinds. Provider errors carry their own status.
    fn default_status(&self) -> StatusCode {
        match self {
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::InvalidContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InvalidJson
            | ErrorCode::InvalidCodeType
            | ErrorCode::InvalidCodeFormat => StatusCode::BAD_REQUEST,
            ErrorCode::ConfigurationError | ErrorCode::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Provider(code) => provider_status(code, None),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Status for a provider-reported OAuth error.
///
/// Known codes use fixed statuses. Anything else keeps the provider's
/// status when it is an error status, and falls back to 400.
pub fn provider_status(code: &str, upstream: Option<StatusCode>) -> StatusCode {
    match code {
        "invalid_request" | "invalid_grant" | "unsupported_grant_type" | "invalid_scope" => {
            StatusCode::BAD_REQUEST
        }
        "invalid_client" | "unauthorized_client" => StatusCode::UNAUTHORIZED,
        _ => upstream
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_REQUEST),
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a ErrorCode,
    message: &'a str,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: ErrorBody<'a>,
}

/// A failure rendered as the uniform error envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<RequestId>,
    pub details: Option<Value>,
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.default_status(),
            code,
            message: message.into(),
            request_id: None,
            details: None,
            retry_after: None,
        }
    }

    pub fn method_not_allowed() -> Self {
        Self::new(ErrorCode::MethodNotAllowed, "Only POST is supported on this route")
    }

    pub fn invalid_content_type() -> Self {
        Self::new(
            ErrorCode::InvalidContentType,
            "Content-Type must be application/json",
        )
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Request body exceeds {} bytes", limit),
        )
    }

    pub fn invalid_json() -> Self {
        Self::new(ErrorCode::InvalidJson, "Request body is not valid JSON")
    }

    pub fn invalid_code_type() -> Self {
        Self::new(ErrorCode::InvalidCodeType, "Field 'code' must be a string")
    }

    pub fn invalid_code_format() -> Self {
        Self::new(
            ErrorCode::InvalidCodeFormat,
            "Field 'code' is not a valid authorization code",
        )
    }

    pub fn configuration() -> Self {
        Self::new(
            ErrorCode::ConfigurationError,
            "Server is missing OAuth client credentials",
        )
    }

    pub fn service_unavailable(retry_after: Option<Duration>) -> Self {
        let mut err = Self::new(
            ErrorCode::ServiceUnavailable,
            "Token service is temporarily unavailable",
        );
        err.retry_after = retry_after;
        err
    }

    pub fn gateway_timeout() -> Self {
        Self::new(ErrorCode::GatewayTimeout, "Token service did not respond in time")
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadGateway, message)
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalServerError, "Internal server error")
    }

    pub fn not_found() -> Self {
        Self::new(ErrorCode::NotFound, "Not found")
    }

    /// An OAuth error reported by the provider.
    pub fn provider(code: &str, description: Option<&str>, upstream: Option<StatusCode>) -> Self {
        let message = description
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Token exchange failed: {}", code));
        let mut err = Self::new(ErrorCode::Provider(code.to_string()), message);
        err.status = provider_status(code, upstream);
        err
    }

    pub fn with_request_id(mut self, request_id: &RequestId) -> Self {
        self.request_id = Some(request_id.clone());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The JSON body this error renders to.
    pub fn body(&self) -> Value {
        let envelope = Envelope {
            error: ErrorBody {
                code: &self.code,
                message: &self.message,
                request_id: self.request_id.as_ref(),
                details: self.details.as_ref(),
            },
        };
        serde_json::to_value(envelope).unwrap_or_else(|_| {
            json!({ "error": { "code": self.code.as_str(), "message": self.message } })
        })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body())).into_response();
        if let Some(after) = self.retry_after {
            let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
