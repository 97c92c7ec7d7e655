//! Upstream token endpoint subsystem.
//!
//! # Data Flow
//! ```text
//! ExchangeRequest (validated code)
//!     → types.rs (build outbound body from config credentials)
//!     → client.rs (breaker gate → timed POST → retry loop)
//!     → types.rs (interpret body: token payload or provider error)
//! ```
//!
//! # Design Decisions
//! - Nothing is persisted; the response is buffered, interpreted and dropped
//! - Provider OAuth errors are data, not transport failures
//! - Outcomes are a tagged `UpstreamError`, matched by the caller

pub mod client;
pub mod types;

pub use client::UpstreamClient;
pub use types::{TokenExchangeRequest, TokenPayload, UpstreamError, UpstreamResponse};
