//! Supervised HTTP serving.
//!
//! A [`Supervisor`] runs the main listener, and optionally a profiling
//! listener, as one unit with a shared shutdown: a cancelled parent token,
//! [`Supervisor::stop`], SIGINT/SIGTERM or a failing listener stop both.

// Core
pub mod lifecycle;
pub mod net;
pub mod supervisor;

// Request-scoped collaborators
pub mod http;
pub mod profiling;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use config::ServerConfig;
pub use net::listener::ServeError;
pub use observability::Logger;
pub use supervisor::{Listening, Supervisor, SupervisorConfig, SupervisorError};
