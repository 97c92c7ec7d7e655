//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the dispatch handler
//! - Wire up middleware (tracing, panic capture, security headers)
//! - Answer CORS preflight, route the exchange, 404 everything else
//! - Run validate → exchange → map for the exchange route
//! - Convert every failure into the error envelope

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    catch_panic::{CatchPanicLayer, ResponseForPanic},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::request::{RequestId, RequestIdExt};
use crate::http::response::ApiError;
use crate::lifecycle::shutdown;
use crate::net::tls;
use crate::observability::metrics;
use crate::resilience::CircuitBreaker;
use crate::security::{no_store, CorsPolicy, RequestValidator};
use crate::upstream::{TokenExchangeRequest, UpstreamClient, UpstreamError};

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid code pattern: {0}")]
    CodePattern(#[from] regex::Error),

    #[error("invalid allowed origin: {0}")]
    AllowedOrigin(#[from] header::InvalidHeaderValue),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid bind address: {0}")]
    BindAddress(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub validator: Arc<RequestValidator>,
    pub cors: CorsPolicy,
    pub upstream: UpstreamClient,
}

/// HTTP server for the token exchange proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
    breaker: Arc<CircuitBreaker>,
}

impl HttpServer {
    /// Create a server with its own circuit breaker.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
        Self::with_breaker(config, breaker)
    }

    /// Create a server that reports to an existing circuit breaker.
    pub fn with_breaker(
        config: ProxyConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, StartupError> {
        let config = Arc::new(config);
        let state = AppState {
            validator: Arc::new(RequestValidator::new(&config.security)?),
            cors: CorsPolicy::new(&config.cors)?,
            upstream: UpstreamClient::new(&config, breaker.clone())?,
            config: config.clone(),
        };

        if config.oauth.credentials().is_none() {
            tracing::warn!("OAuth client credentials are not set; exchanges will fail with CONFIGURATION_ERROR");
        }

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            breaker,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let cors = state.cors.clone();
        let router = Router::new().fallback(dispatch).with_state(state);
        with_middleware(router, config, cors)
    }

    /// The router, for serving it elsewhere or driving it in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run the server on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            exchange_path = %self.config.oauth.exchange_path,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Bind the configured address and serve, over TLS when configured.
    pub async fn serve(self, shutdown: broadcast::Receiver<()>) -> Result<(), StartupError> {
        match self.config.listener.tls.clone() {
            Some(tls_config) => {
                let addr = self.config.listener.bind_address.parse::<SocketAddr>()?;
                let rustls = tls::load_tls_config(
                    Path::new(&tls_config.cert_path),
                    Path::new(&tls_config.key_path),
                )
                .await?;
                tls::serve_tls(addr, rustls, self.router, shutdown).await?;
            }
            None => {
                let listener = TcpListener::bind(&self.config.listener.bind_address).await?;
                self.run(listener, shutdown).await?;
            }
        }
        Ok(())
    }
}

/// Wrap `router` in panic capture, security headers and tracing.
fn with_middleware(router: Router, config: &ProxyConfig, cors: CorsPolicy) -> Router {
    let mut router = router.layer(CatchPanicLayer::custom(PanicResponder { cors }));

    if config.security.enable_headers {
        router = router.layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ));
    }

    router.layer(TraceLayer::new_for_http())
}

/// Top-level dispatch: preflight, exchange route, or 404.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();

    if request.method() == Method::OPTIONS {
        metrics::record_request("preflight", 204, start);
        return state.cors.preflight();
    }

    let request_id = RequestId::new();
    let (route, response) = if request.uri().path() == state.config.oauth.exchange_path {
        let span = tracing::info_span!("exchange", request_id = %request_id);
        let deadline = state.config.timeouts.request();
        let pipeline = handle_exchange(&state, request, &request_id).instrument(span);

        let response = match tokio::time::timeout(deadline, pipeline).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::info!(
                    request_id = %request_id,
                    code = %err.code,
                    status = err.status.as_u16(),
                    "Exchange failed"
                );
                err.with_request_id(&request_id).into_response()
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Exchange exceeded request deadline"
                );
                ApiError::gateway_timeout()
                    .with_request_id(&request_id)
                    .into_response()
            }
        };
        ("exchange", response)
    } else {
        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
            "No route matched"
        );
        (
            "not_found",
            ApiError::not_found()
                .with_request_id(&request_id)
                .into_response(),
        )
    };

    metrics::record_request(route, response.status().as_u16(), start);
    state.cors.apply(response).with_request_id(&request_id)
}

/// validate → exchange → map.
async fn handle_exchange(
    state: &AppState,
    request: Request<Body>,
    request_id: &RequestId,
) -> Result<Response, ApiError> {
    let exchange = state.validator.validate(request).await?;
    tracing::debug!(code_len = exchange.code.len(), "Exchange request accepted");

    let Some(outbound) = TokenExchangeRequest::new(&state.config.oauth, &exchange.code) else {
        tracing::error!("OAuth client credentials are not configured");
        return Err(ApiError::configuration());
    };

    let mut token = state
        .upstream
        .exchange(&outbound, request_id)
        .await
        .map_err(map_upstream_error)?;

    token.insert(
        "requestId".to_string(),
        Value::String(request_id.to_string()),
    );
    Ok(no_store(Json(token).into_response()))
}

/// Translate an upstream outcome into the client-facing envelope.
pub fn map_upstream_error(err: UpstreamError) -> ApiError {
    match err {
        UpstreamError::CircuitOpen { retry_after } => ApiError::service_unavailable(retry_after),
        UpstreamError::Timeout(_) => ApiError::gateway_timeout(),
        UpstreamError::Transport(_) => ApiError::bad_gateway("Token service could not be reached"),
        UpstreamError::UpstreamStatus {
            status,
            provider_error: Some(code),
            message,
        } => ApiError::provider(&code, message.as_deref(), Some(status)),
        UpstreamError::UpstreamStatus { status, .. } => {
            ApiError::bad_gateway("Token service returned an unexpected response")
                .with_details(json!({ "upstreamStatus": status.as_u16() }))
        }
        UpstreamError::Malformed { status, reason } => {
            ApiError::bad_gateway("Token service returned a malformed response")
                .with_details(json!({ "upstreamStatus": status.as_u16(), "reason": reason }))
        }
    }
}

/// Renders a handler panic as a 500 envelope carrying the usual
/// correlation and CORS headers.
#[derive(Debug, Clone)]
struct PanicResponder {
    cors: CorsPolicy,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, _err: Box<dyn Any + Send + 'static>) -> Response {
        let request_id = RequestId::new();
        tracing::error!(request_id = %request_id, "Handler panicked");

        let response = ApiError::internal()
            .with_request_id(&request_id)
            .into_response();
        self.cors.apply(response).with_request_id(&request_id)
    }
}
