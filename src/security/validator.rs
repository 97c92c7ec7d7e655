//! Inbound request validation for the exchange route.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! ```text
//! method == POST                       → 405 METHOD_NOT_ALLOWED
//! Content-Type: application/json...    → 415 INVALID_CONTENT_TYPE
//! Content-Length <= limit (if numeric) → 413 PAYLOAD_TOO_LARGE
//! body bytes <= limit                  → 413 PAYLOAD_TOO_LARGE
//! body parses as JSON                  → 400 INVALID_JSON
//! body.code is a string                → 400 INVALID_CODE_TYPE
//! trimmed code matches pattern         → 400 INVALID_CODE_FORMAT
//! ```

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request};
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;

use crate::config::SecurityConfig;
use crate::http::response::ApiError;

/// A validated exchange request. Lives for one request only.
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Authorization code, trimmed.
    pub code: String,
}

// Codes are credentials; keep them out of debug output.
impl std::fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("code_len", &self.code.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    max_body_size: usize,
    code_pattern: Regex,
}

impl RequestValidator {
    pub fn new(config: &SecurityConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            max_body_size: config.max_body_size,
            code_pattern: Regex::new(&config.code_pattern)?,
        })
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Run every check against a full request, reading at most
    /// `max_body_size + 1` bytes of its body.
    pub async fn validate(&self, request: Request<Body>) -> Result<ExchangeRequest, ApiError> {
        let (parts, body) = request.into_parts();
        self.check_head(&parts.method, &parts.headers)?;
        let bytes = self.read_body(body).await?;
        self.check_body(&bytes)
    }

    /// Method, Content-Type and declared Content-Length checks.
    pub fn check_head(&self, method: &Method, headers: &HeaderMap) -> Result<(), ApiError> {
        if method != Method::POST {
            return Err(ApiError::method_not_allowed());
        }

        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start().to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return Err(ApiError::invalid_content_type());
        }

        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(len) = declared {
            if len > self.max_body_size as u64 {
                return Err(ApiError::payload_too_large(self.max_body_size));
            }
        }

        Ok(())
    }

    /// Buffer the body, giving up as soon as it grows past the limit.
    async fn read_body(&self, body: Body) -> Result<Vec<u8>, ApiError> {
        let mut stream = body.into_data_stream();
        let mut buf = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::debug!(error = %e, "Failed to read request body");
                ApiError::invalid_json()
            })?;
            if buf.len() + chunk.len() > self.max_body_size {
                return Err(ApiError::payload_too_large(self.max_body_size));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf)
    }

    /// Size, JSON shape and code format checks over a buffered body.
    pub fn check_body(&self, body: &[u8]) -> Result<ExchangeRequest, ApiError> {
        if body.len() > self.max_body_size {
            return Err(ApiError::payload_too_large(self.max_body_size));
        }

        let text = std::str::from_utf8(body).map_err(|_| ApiError::invalid_json())?;
        let value: Value = serde_json::from_str(text).map_err(|_| ApiError::invalid_json())?;

        let code = value
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(ApiError::invalid_code_type)?
            .trim();

        if !self.code_pattern.is_match(code) {
            return Err(ApiError::invalid_code_format());
        }

        Ok(ExchangeRequest {
            code: code.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::ErrorCode;

    fn validator() -> RequestValidator {
        RequestValidator::new(&SecurityConfig::default()).unwrap()
    }

    fn request(method: Method, content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/auth");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn code_of(req: Request<Body>) -> ErrorCode {
        validator().validate(req).await.unwrap_err().code
    }

    #[tokio::test]
    async fn test_valid_request() {
        let req = request(
            Method::POST,
            Some("application/json"),
            r#"{"code": "  abc123XYZ_-0000  "}"#,
        );
        let exchange = validator().validate(req).await.unwrap();
        assert_eq!(exchange.code, "abc123XYZ_-0000");
    }

    #[tokio::test]
    async fn test_method_checked_before_content_type() {
        let req = request(Method::GET, Some("text/plain"), "");
        assert_eq!(code_of(req).await, ErrorCode::MethodNotAllowed);
    }

    #[tokio::test]
    async fn test_content_type_variants() {
        let ok = ["application/json", "Application/JSON", "application/json; charset=utf-8"];
        for ct in ok {
            let req = request(Method::POST, Some(ct), r#"{"code":"abcdefghij"}"#);
            assert!(validator().validate(req).await.is_ok(), "{ct}");
        }

        for ct in [None, Some("text/plain"), Some("application/x-www-form-urlencoded")] {
            let req = request(Method::POST, ct, r#"{"code":"abcdefghij"}"#);
            assert_eq!(code_of(req).await, ErrorCode::InvalidContentType);
        }
    }

    #[tokio::test]
    async fn test_declared_length_rejected_before_read() {
        let req = Request::builder()
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "999999")
            .body(Body::from(r#"{"code":"abcdefghij"}"#))
            .unwrap();
        assert_eq!(code_of(req).await, ErrorCode::PayloadTooLarge);
    }

    #[tokio::test]
    async fn test_oversized_body_without_length_header() {
        let padding = "x".repeat(20 * 1024);
        let body = format!(r#"{{"code":"abcdefghij","pad":"{padding}"}}"#);
        let req = request(Method::POST, Some("application/json"), &body);
        assert_eq!(code_of(req).await, ErrorCode::PayloadTooLarge);
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let req = request(Method::POST, Some("application/json"), "{code:");
        assert_eq!(code_of(req).await, ErrorCode::InvalidJson);
    }

    #[test]
    fn test_code_type() {
        for body in [r#"{}"#, r#"{"code": 12345678901}"#, r#"{"code": null}"#, r#"["code"]"#] {
            let err = validator().check_body(body.as_bytes()).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidCodeType, "{body}");
        }
    }

    #[test]
    fn test_code_format() {
        let too_long = format!(r#"{{"code":"{}"}}"#, "a".repeat(101));
        let bad = [
            r#"{"code":"short"}"#,
            r#"{"code":"has spaces inside"}"#,
            r#"{"code":"semi;colon123"}"#,
            r#"{"code":"          "}"#,
            too_long.as_str(),
        ];
        for body in bad {
            let err = validator().check_body(body.as_bytes()).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidCodeFormat, "{body}");
        }

        let longest = format!(r#"{{"code":"{}"}}"#, "a".repeat(100));
        assert!(validator().check_body(longest.as_bytes()).is_ok());
    }

    #[test]
    fn test_custom_pattern() {
        let config = SecurityConfig {
            code_pattern: "^[0-9a-f]{20}$".into(),
            ..SecurityConfig::default()
        };
        let validator = RequestValidator::new(&config).unwrap();
        assert!(validator.check_body(br#"{"code":"0123456789abcdef0123"}"#).is_ok());
        assert!(validator.check_body(br#"{"code":"abc123XYZ_-0000"}"#).is_err());
    }

    #[test]
    fn test_debug_hides_code() {
        let req = ExchangeRequest {
            code: "abc123XYZ_-0000".into(),
        };
        let printed = format!("{:?}", req);
        assert!(!printed.contains("abc123"));
        assert!(printed.contains("code_len"));
    }
}
