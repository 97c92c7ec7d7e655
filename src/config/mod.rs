//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → optional TOML file (PROXY_CONFIG)
//!     → environment overrides (loader.rs)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Client credentials are only checked per request

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_from_env, load_with, ConfigError};
pub use schema::{
    CircuitBreakerConfig, CorsConfig, ListenerConfig, LogFormat, OAuthConfig,
    ObservabilityConfig, ProxyConfig, RetryConfig, Secret, SecurityConfig, TimeoutConfig,
    TlsConfig,
};
