//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, dispatch by method and path)
//!     → request.rs (assign request ID)
//!     → security::validator (shape and format checks)
//!     → upstream::client (token endpoint call)
//!     → response.rs (token body or error envelope)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use response::{ApiError, ErrorCode};
pub use server::{map_upstream_error, AppState, HttpServer, StartupError};
