//! Listener task: one bind address plus one handler.
//!
//! # Responsibilities
//! - Bind to the configured address (fatal on failure, never retried)
//! - Serve requests with the handler until the owning token is cancelled
//! - Drain in-flight requests, then report the benign "closed" outcome
//!
//! # Design Decisions
//! - No drain deadline here; callers bound it through the token they cancel
//! - Accept loop and connection draining are axum's graceful serve

use std::io;
use std::net::SocketAddr;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

/// Outcome of a listener task that did not simply return `Ok`.
///
/// `Closed` and `Cancelled` are benign: they are how a listener reports a
/// shutdown it was asked for.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ServeError {
    /// Failed to bind to address.
    #[error("{listener}: failed to bind {address}: {source}")]
    Bind {
        listener: String,
        address: String,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure while serving.
    #[error("{listener}: {source}")]
    Io {
        listener: String,
        #[source]
        source: io::Error,
    },

    /// The listener drained and closed because its token was cancelled.
    #[error("{listener}: closed by shutdown")]
    Closed { listener: String },

    /// The task observed cancellation before it started serving.
    #[error("cancelled")]
    Cancelled,

    /// The task panicked.
    #[error("{listener}: task panicked")]
    Panicked { listener: String },
}

impl ServeError {
    pub fn is_benign(&self) -> bool {
        matches!(self, ServeError::Closed { .. } | ServeError::Cancelled)
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServeError::Bind { .. } => "listener_bind",
            ServeError::Io { .. } => "listener_io",
            ServeError::Closed { .. } => "listener_closed",
            ServeError::Cancelled => "listener_cancelled",
            ServeError::Panicked { .. } => "listener_panicked",
        }
    }
}

/// Callback told the bound address once listening, and `None` once closed.
pub type Announce = Box<dyn Fn(Option<SocketAddr>) + Send + Sync>;

/// A bind address and the handler that serves it.
pub struct ListenerTask {
    name: String,
    address: String,
    router: Router,
    announce: Option<Announce>,
}

impl ListenerTask {
    pub fn new(name: impl Into<String>, address: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            router,
            announce: None,
        }
    }

    pub fn with_announce(mut self, announce: Announce) -> Self {
        self.announce = Some(announce);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind and serve until `token` is cancelled.
    ///
    /// Returns `Err(ServeError::Closed)` after a graceful drain.
    pub async fn serve(self, token: CancellationToken) -> Result<(), ServeError> {
        let ListenerTask {
            name,
            address,
            router,
            announce,
        } = self;

        if token.is_cancelled() {
            return Err(ServeError::Cancelled);
        }

        let listener = TcpListener::bind(bind_target(&address))
            .await
            .map_err(|source| ServeError::Bind {
                listener: name.clone(),
                address: address.clone(),
                source,
            })?;

        let local_addr = listener.local_addr().map_err(|source| ServeError::Io {
            listener: name.clone(),
            source,
        })?;

        tracing::info!(listener = %name, address = %local_addr, "Listener bound");
        if let Some(announce) = &announce {
            announce(Some(local_addr));
        }

        let drain_name = name.clone();
        let shutdown = async move {
            token.cancelled().await;
            tracing::info!(listener = %drain_name, "Draining in-flight requests");
        }
        .with_current_subscriber();

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        if let Some(announce) = &announce {
            announce(None);
        }

        match result {
            Ok(()) => {
                tracing::info!(listener = %name, address = %local_addr, "Listener closed");
                Err(ServeError::Closed { listener: name })
            }
            Err(source) => Err(ServeError::Io {
                listener: name,
                source,
            }),
        }
    }
}

/// Turn a Go-style `":port"` address into one that binds all interfaces.
pub fn bind_target(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}
