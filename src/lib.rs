//! OAuth authorization code exchange proxy.
//!
//! Accepts a browser-held authorization code, swaps it for a token at the
//! provider's token endpoint using server-held client credentials, and
//! returns the provider's token fields. Nothing is persisted between
//! requests apart from the shared circuit breaker.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod upstream;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
