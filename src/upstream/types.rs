//! Token endpoint wire types and error definitions.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{OAuthConfig, Secret};

/// The only grant this proxy performs.
pub const GRANT_TYPE: &str = "authorization_code";

/// Outbound body for the token endpoint.
///
/// Carries the client secret and the authorization code, so it has no
/// `Debug` impl.
#[derive(Serialize)]
pub struct TokenExchangeRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    #[serde(serialize_with = "expose_secret")]
    client_secret: &'a Secret,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<&'a str>,
    grant_type: &'static str,
}

fn expose_secret<S: serde::Serializer>(secret: &&Secret, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose())
}

impl<'a> TokenExchangeRequest<'a> {
    /// Build the exchange body, or `None` if client credentials are missing.
    pub fn new(oauth: &'a OAuthConfig, code: &'a str) -> Option<Self> {
        let (client_id, client_secret) = oauth.credentials()?;
        Some(Self {
            code,
            client_id,
            client_secret,
            redirect_uri: oauth.redirect_uri.as_deref(),
            grant_type: GRANT_TYPE,
        })
    }
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Opaque token fields returned by the provider.
pub type TokenPayload = Map<String, Value>;

/// Errors that can occur while exchanging a code.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Circuit breaker rejected the call; no request was sent.
    #[error("circuit breaker is open")]
    CircuitOpen { retry_after: Option<Duration> },

    /// The final attempt exceeded the per-attempt timeout.
    #[error("upstream timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Connection-level failure on the final attempt.
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with an error status or an OAuth error body.
    #[error("upstream returned {status}")]
    UpstreamStatus {
        status: StatusCode,
        provider_error: Option<String>,
        message: Option<String>,
    },

    /// Upstream answered with a body that is not a usable token response.
    #[error("malformed upstream response ({status}): {reason}")]
    Malformed { status: StatusCode, reason: &'static str },
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

impl UpstreamResponse {
    /// Interpret the response as a token payload.
    ///
    /// A structured OAuth `error` field wins over the status code, since some
    /// providers report failed exchanges with 200.
    pub fn into_token(self) -> UpstreamResult<TokenPayload> {
        let status = self.status;
        let parsed: Option<TokenPayload> = serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            });

        let Some(map) = parsed else {
            if status.is_success() {
                return Err(UpstreamError::Malformed {
                    status,
                    reason: "body is not a JSON object",
                });
            }
            return Err(UpstreamError::UpstreamStatus {
                status,
                provider_error: None,
                message: None,
            });
        };

        if let Some(code) = map.get("error").and_then(Value::as_str) {
            return Err(UpstreamError::UpstreamStatus {
                status,
                provider_error: Some(code.to_string()),
                message: map
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        if !status.is_success() {
            return Err(UpstreamError::UpstreamStatus {
                status,
                provider_error: None,
                message: None,
            });
        }

        if !map.get("access_token").is_some_and(Value::is_string) {
            return Err(UpstreamError::Malformed {
                status,
                reason: "missing access_token",
            });
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> UpstreamResponse {
        UpstreamResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn oauth() -> OAuthConfig {
        OAuthConfig {
            client_id: Some("client".into()),
            client_secret: Some(Secret::new("secret")),
            ..OAuthConfig::default()
        }
    }

    #[test]
    fn test_request_body_shape() {
        let mut config = oauth();
        config.redirect_uri = Some("https://app.example.com/cb".into());
        let body = serde_json::to_value(TokenExchangeRequest::new(&config, "abc123XYZ_-0000").unwrap())
            .unwrap();

        assert_eq!(body["code"], "abc123XYZ_-0000");
        assert_eq!(body["client_id"], "client");
        assert_eq!(body["client_secret"], "secret");
        assert_eq!(body["redirect_uri"], "https://app.example.com/cb");
        assert_eq!(body["grant_type"], "authorization_code");
    }

    #[test]
    fn test_request_omits_unset_redirect() {
        let config = oauth();
        let body = serde_json::to_value(TokenExchangeRequest::new(&config, "abcdefghij").unwrap())
            .unwrap();
        assert!(body.get("redirect_uri").is_none());
    }

    #[test]
    fn test_request_requires_credentials() {
        let config = OAuthConfig::default();
        assert!(TokenExchangeRequest::new(&config, "abcdefghij").is_none());
    }

    #[test]
    fn test_token_passthrough() {
        let token = response(200, r#"{"access_token":"tok","expires_in":3600,"scope":"repo"}"#)
            .into_token()
            .unwrap();
        assert_eq!(token["access_token"], "tok");
        assert_eq!(token["expires_in"], 3600);
        assert_eq!(token["scope"], "repo");
    }

    #[test]
    fn test_oauth_error_with_success_status() {
        let err = response(200, r#"{"error":"bad_verification_code","error_description":"expired"}"#)
            .into_token()
            .unwrap_err();
        match err {
            UpstreamError::UpstreamStatus { status, provider_error, message } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(provider_error.as_deref(), Some("bad_verification_code"));
                assert_eq!(message.as_deref(), Some("expired"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_malformed_success_bodies() {
        for body in ["<html>", "[1,2]", r#"{"token_type":"bearer"}"#] {
            let err = response(200, body).into_token().unwrap_err();
            assert!(matches!(err, UpstreamError::Malformed { .. }), "{body}");
        }
    }

    #[test]
    fn test_unstructured_error_status() {
        let err = response(503, "upstream down").into_token().unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::UpstreamStatus { status, provider_error: None, .. }
                if status == StatusCode::SERVICE_UNAVAILABLE
        ));
    }
}
