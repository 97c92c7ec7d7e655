//! Token endpoint client with timeout, retry and circuit breaking.
//!
//! # Responsibilities
//! - POST the exchange body to the provider token endpoint
//! - Bound every attempt with a timeout that cancels the request
//! - Retry transient failures with jittered backoff
//! - Report every attempt's verdict to the circuit breaker

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, StatusCode};
use reqwest::redirect::Policy;

use crate::config::ProxyConfig;
use crate::http::request::RequestId;
use crate::observability::metrics;
use crate::resilience::retries::is_retryable;
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::upstream::types::{
    TokenExchangeRequest, TokenPayload, UpstreamError, UpstreamResponse, UpstreamResult,
};

/// Resilient client for the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    token_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

/// Token responses are small; anything past this is not a token response.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// What a single attempt produced, before retry decisions.
enum Attempt {
    Response(UpstreamResponse),
    Transport(String),
    TimedOut,
}

impl UpstreamClient {
    /// Create a client sharing `breaker` with every other user of the same upstream.
    pub fn new(config: &ProxyConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("token-exchange-proxy/", env!("CARGO_PKG_VERSION")))
            // never replay client credentials to another location
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            http,
            token_url: config.oauth.token_url.clone(),
            timeout: config.timeouts.upstream(),
            retry: RetryPolicy::new(&config.retries),
            breaker,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Exchange a code and interpret the provider's answer.
    pub async fn exchange(
        &self,
        request: &TokenExchangeRequest<'_>,
        request_id: &RequestId,
    ) -> UpstreamResult<TokenPayload> {
        self.send(request, request_id).await?.into_token()
    }

    /// Run the attempt loop and return the deciding response.
    ///
    /// 2xx and 4xx responses end the loop at once. A 5xx response on the
    /// final attempt is returned rather than hidden behind an error, so the
    /// caller can surface the provider's body.
    pub async fn send(
        &self,
        request: &TokenExchangeRequest<'_>,
        request_id: &RequestId,
    ) -> UpstreamResult<UpstreamResponse> {
        let mut attempt: u32 = 0;

        loop {
            let Some(permit) = self.breaker.try_acquire() else {
                tracing::warn!(request_id = %request_id, attempt, "Circuit open, failing fast");
                metrics::record_upstream_attempt("circuit_open");
                return Err(UpstreamError::CircuitOpen {
                    retry_after: self.breaker.retry_after(),
                });
            };

            let last = !self.retry.has_attempts_left(attempt);

            match self.attempt(request).await {
                Attempt::Response(response) if response.status.is_success() => {
                    permit.success();
                    metrics::record_upstream_attempt("success");
                    tracing::debug!(request_id = %request_id, attempt, "Token exchange succeeded");
                    return Ok(response);
                }
                Attempt::Response(response) if is_retryable(Some(response.status.as_u16()), false) => {
                    permit.failure();
                    metrics::record_upstream_attempt("server_error");
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        status = %response.status,
                        "Upstream server error"
                    );
                    if last {
                        return Ok(response);
                    }
                }
                Attempt::Response(response) => {
                    // Client errors say nothing about upstream health.
                    drop(permit);
                    metrics::record_upstream_attempt("client_error");
                    tracing::info!(
                        request_id = %request_id,
                        attempt,
                        status = %response.status,
                        "Upstream rejected exchange"
                    );
                    return Ok(response);
                }
                Attempt::Transport(reason) => {
                    permit.failure();
                    metrics::record_upstream_attempt("transport_error");
                    tracing::warn!(request_id = %request_id, attempt, error = %reason, "Upstream transport error");
                    if last {
                        return Err(UpstreamError::Transport(reason));
                    }
                }
                Attempt::TimedOut => {
                    permit.failure();
                    metrics::record_upstream_attempt("timeout");
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Upstream attempt timed out"
                    );
                    if last {
                        return Err(UpstreamError::Timeout(self.timeout));
                    }
                }
            }

            let delay = self.retry.delay(attempt);
            tracing::info!(
                request_id = %request_id,
                attempt,
                max_attempts = self.retry.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "Retrying token exchange"
            );
            metrics::record_retry();
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One POST, response body included, bounded by the per-attempt timeout.
    async fn attempt(&self, request: &TokenExchangeRequest<'_>) -> Attempt {
        let call = async {
            let mut response = self
                .http
                .post(&self.token_url)
                .header(header::ACCEPT, "application/json")
                .json(request)
                .send()
                .await?;
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);

            if response
                .content_length()
                .is_some_and(|len| len > MAX_RESPONSE_BYTES as u64)
            {
                return Err(CallError::TooLarge);
            }

            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
                    return Err(CallError::TooLarge);
                }
                body.extend_from_slice(&chunk);
            }

            Ok(UpstreamResponse {
                status,
                body: Bytes::from(body),
            })
        };

        match with_timeout(self.timeout, call).await {
            Ok(Ok(response)) => Attempt::Response(response),
            Ok(Err(CallError::Http(e))) if e.is_timeout() => Attempt::TimedOut,
            Ok(Err(CallError::Http(e))) => Attempt::Transport(transport_reason(&e)),
            Ok(Err(CallError::TooLarge)) => {
                Attempt::Transport(format!("response body exceeds {MAX_RESPONSE_BYTES} bytes"))
            }
            Err(_) => Attempt::TimedOut,
        }
    }
}

/// Failure inside a single attempt.
enum CallError {
    Http(reqwest::Error),
    TooLarge,
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        CallError::Http(e)
    }
}

/// Describe a transport failure without echoing the URL or body.
fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_connect() {
        "connection failed".to_string()
    } else if e.is_body() || e.is_decode() {
        "response body could not be read".to_string()
    } else if e.is_request() {
        "request could not be sent".to_string()
    } else {
        "upstream request failed".to_string()
    }
}
