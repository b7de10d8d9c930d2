//! HTTP building blocks for the main listener.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → server.rs (trace, timeout, in-flight tracking, 404 fallback)
//!     → request_log.rs / auth.rs (opt-in per route set)
//!     → registered handler (json.rs for bodies, error.rs for failures)
//!     → Send to client
//! ```

pub mod auth;
pub mod error;
pub mod inflight;
pub mod json;
pub mod request_log;
pub mod server;

pub use auth::{basic_auth, trusted_header_auth, BasicAuth, TrustedHeaderAuth, User};
pub use error::{method_not_allowed, status_response, text_error};
pub use inflight::{RequestStats, RequestTracker};
pub use json::{JsonBody, MalformedRequest};
pub use request_log::{request_log, RequestLog, ServerRequestId, X_REQUEST_ID};
pub use server::{build_app, AppOptions};
