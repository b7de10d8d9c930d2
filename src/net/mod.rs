//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! bind address
//!     → listener.rs (bind, serve with the handler, graceful drain)
//!     → axum / hyper connection handling
//!     → Hand off to the HTTP layer
//!
//! Listener States:
//!     Binding → Serving → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - A bind failure is fatal and never retried
//! - Draining has no deadline at this layer
//! - TLS is out of scope; terminate it in front of the server

pub mod listener;

pub use listener::{ListenerTask, ServeError};
