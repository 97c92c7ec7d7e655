//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Plain TCP:   tokio listener → axum::serve (http/server.rs)
//! TLS:         tls.rs (rustls handshake via axum-server) → same Router
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently
//! - Both paths share one Router and one shutdown signal

pub mod tls;
