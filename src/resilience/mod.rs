//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to upstream:
//!     → circuit_breaker.rs (fail fast while open, admit one trial when half-open)
//!     → timeouts.rs (enforce per-attempt deadline)
//!     → On failure: retries.rs (check if retryable, wait backoff.rs delay)
//!     → circuit_breaker.rs (record verdict)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for transient failures (timeouts, connection errors, 5xx)
//! - Circuit breaker prevents cascading failures
//! - Every piece is a plain value the caller owns; nothing is global

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use retries::RetryPolicy;
