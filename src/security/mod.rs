//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (OPTIONS answered as CORS preflight)
//!     → validator.rs (method, content type, size, payload shape)
//!     → Pass to upstream exchange
//! Outgoing response:
//!     → headers.rs (CORS origin, no-store on tokens)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: size checked from the header and again while reading
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod headers;
pub mod validator;

pub use headers::{no_store, CorsPolicy};
pub use validator::{ExchangeRequest, RequestValidator};
