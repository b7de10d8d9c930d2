//! Structured logging.
//!
//! # Responsibilities
//! - Carry an explicit logging capability ([`Logger`]) into library code
//! - Initialize the process subscriber for the binaries
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Library code never installs a global subscriber; it runs its futures
//!   under the dispatcher held by its [`Logger`]
//! - JSON format for production, pretty format for development

use std::future::Future;

use tracing::instrument::{Instrumented, WithDispatch, WithSubscriber};
use tracing::{Dispatch, Instrument, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging capability handed to the supervisor and request middleware.
///
/// `Noop` discards every event and is the default.
#[derive(Clone, Default)]
pub enum Logger {
    #[default]
    Noop,
    Dispatch(Dispatch),
}

impl Logger {
    /// Capture the dispatcher that is current on this thread.
    pub fn current() -> Self {
        Logger::Dispatch(tracing::dispatcher::get_default(Dispatch::clone))
    }

    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Logger::Dispatch(dispatch)
    }

    pub fn dispatch(&self) -> Dispatch {
        match self {
            Logger::Noop => Dispatch::none(),
            Logger::Dispatch(dispatch) => dispatch.clone(),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Logger::Noop)
    }

    /// Run `future` with this logger as the default dispatcher.
    pub fn scope<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch())
    }

    /// Like [`Logger::scope`], entering `span` on every poll.
    ///
    /// The span must have been created under this logger (see [`Logger::in_scope`]).
    pub fn scope_span<F: Future>(&self, future: F, span: Span) -> WithDispatch<Instrumented<F>> {
        future.instrument(span).with_subscriber(self.dispatch())
    }

    /// Run a synchronous closure with this logger as the default dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch(), f)
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Logger::Noop => f.write_str("Logger::Noop"),
            Logger::Dispatch(_) => f.write_str("Logger::Dispatch"),
        }
    }
}

/// Install the process-wide subscriber used by the binaries.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_subscriber(default_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
