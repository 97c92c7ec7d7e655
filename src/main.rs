//! Token exchange proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │              TOKEN EXCHANGE PROXY            │
//!                        │                                              │
//!   POST /auth {code}    │  ┌──────────┐   ┌───────────┐   ┌─────────┐  │
//!   ─────────────────────┼─▶│  router  │──▶│ validator │──▶│upstream │──┼──▶ Token
//!                        │  │ + CORS   │   │           │   │ client  │  │    endpoint
//!   token / envelope     │  └──────────┘   └───────────┘   └────┬────┘  │
//!   ◀────────────────────┼────────────────────────────────────── │       │
//!                        │                          retry + timeout      │
//!                        │                          circuit breaker      │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! Configuration comes from the environment, optionally layered over the
//! TOML file named by `PROXY_CONFIG`.

use std::net::SocketAddr;
use std::process::ExitCode;

use token_exchange_proxy::config::{load_from_env, ProxyConfig};
use token_exchange_proxy::lifecycle::signals::forward_signals;
use token_exchange_proxy::observability::{logging, metrics};
use token_exchange_proxy::{HttpServer, Shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("token-exchange-proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("token-exchange-proxy: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        token_url = %config.oauth.token_url,
        upstream_timeout_ms = config.timeouts.upstream_ms,
        max_retries = config.retries.max_retries,
        failure_threshold = config.circuit_breaker.failure_threshold,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let shutdown = Shutdown::new();
    tokio::spawn(forward_signals(shutdown.clone()));

    let server = HttpServer::new(config)?;
    server.serve(shutdown.subscribe()).await?;
    Ok(())
}
