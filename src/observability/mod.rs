//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor, listeners, request middleware produce:
//!     → logging.rs (structured events through an explicit Logger)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log output installed by the binary (stdout, pretty or JSON)
//!     → /debug/metrics on the diagnostic listener (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - No process-wide default logger inside the library
//! - Request ID flows through the request span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::Logger;
