//! Supervisor: runs the main listener and the optional profiling listener
//! as one unit.
//!
//! # State machine
//! ```text
//! Idle ──start()──► Running ──(task group done)──► Idle
//!                      │
//!                      └── stop(), parent token, SIGINT/SIGTERM
//!                          cancel the run token; start() unblocks after drain
//! ```
//!
//! # Responsibilities
//! - Collect routes and the profiling address while idle
//! - Guard against a second concurrent run
//! - Bridge signals into the run token, spawn the listener tasks and wait
//!   for all of them
//! - Decide which outcomes are a clean shutdown and which are failures

use std::collections::HashSet;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::Request,
    response::IntoResponse,
    routing::{MethodRouter, Route},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use crate::config::ServerConfig;
use crate::http::inflight::RequestTracker;
use crate::http::server::{build_app, AppOptions};
use crate::lifecycle::{self, BridgeGuard, SignalHandling, TaskGroup};
use crate::net::listener::{Announce, ListenerTask, ServeError};
use crate::observability::Logger;
use crate::profiling::{self, ProfilingState};

/// Errors reported by the [`Supervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Configuration change or second `start` while a run is active.
    #[error("server already started")]
    AlreadyStarted,

    /// Route patterns must be absolute and use `{name}` captures.
    #[error("invalid route pattern {0:?}")]
    InvalidPattern(String),

    /// Same route shape as one already registered (capture names aside).
    #[error("route pattern {0:?} conflicts with one already registered")]
    DuplicatePattern(String),

    /// `merge` was combined with `handle` registrations or another merge.
    #[error("a merged router cannot be combined with other registrations")]
    MixedRegistration,

    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),

    /// A listener failed; carries the listener's own error.
    #[error(transparent)]
    Serve(#[from] ServeError),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::AlreadyStarted => "supervisor_already_started",
            SupervisorError::InvalidPattern(_) => "supervisor_invalid_pattern",
            SupervisorError::DuplicatePattern(_) => "supervisor_duplicate_pattern",
            SupervisorError::MixedRegistration => "supervisor_mixed_registration",
            SupervisorError::Signals(_) => "supervisor_signals",
            SupervisorError::Serve(err) => err.as_label(),
        }
    }
}

/// Construction-time settings of a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Main listener address. `":8080"` binds every interface.
    pub listen_address: String,
    /// Falls back to [`Logger::Noop`].
    pub logger: Option<Logger>,
    pub signals: SignalHandling,
    /// Answer 408 for requests running longer than this.
    pub request_timeout: Option<Duration>,
    /// Requests served at once by the main listener; extra ones wait.
    pub max_in_flight: Option<usize>,
}

impl SupervisorConfig {
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            logger: None,
            signals: SignalHandling::default(),
            request_timeout: None,
            max_in_flight: None,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_signals(mut self, signals: SignalHandling) -> Self {
        self.signals = signals;
        self
    }
}

/// Addresses the listeners of the current run are bound to.
///
/// Reset to `None` once a listener has closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Listening {
    pub main: Option<SocketAddr>,
    pub profiling: Option<SocketAddr>,
}

#[derive(Default)]
struct State {
    routes: Router,
    patterns: HashSet<String>,
    merged: bool,
    profiling: Option<String>,
    prometheus: Option<PrometheusHandle>,
    run: Option<CancellationToken>,
}

/// Everything a run needs, captured while holding the state lock.
struct Run<'a> {
    active: ActiveRun<'a>,
    bridge: BridgeGuard,
    routes: Router,
    profiling: Option<String>,
    prometheus: Option<PrometheusHandle>,
}

/// Marks the supervisor Running for as long as it lives.
///
/// Dropping it, including when the `start` future is dropped mid-run,
/// cancels the run token and returns the supervisor to Idle.
struct ActiveRun<'a> {
    supervisor: &'a Supervisor,
    token: CancellationToken,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.supervisor.state().run = None;
        self.supervisor.listening.send_replace(Listening::default());
    }
}

/// Runs the main listener, and optionally the profiling listener, until
/// shutdown.
///
/// `start` borrows `self`, so share the supervisor (e.g. in an `Arc`) to
/// call `stop` from elsewhere.
pub struct Supervisor {
    config: SupervisorConfig,
    logger: Logger,
    tracker: RequestTracker,
    state: Mutex<State>,
    listening: Arc<watch::Sender<Listening>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let logger = config.logger.clone().unwrap_or_default();
        let tracker = match config.max_in_flight {
            Some(limit) if limit > 0 => RequestTracker::with_limit(limit),
            _ => RequestTracker::new(),
        };
        let (listening, _) = watch::channel(Listening::default());

        Self {
            config,
            logger,
            tracker,
            state: Mutex::new(State::default()),
            listening: Arc::new(listening),
        }
    }

    /// Build a supervisor from a loaded config file.
    ///
    /// Profiling is enabled when the file asks for it.
    pub fn from_config(config: &ServerConfig, logger: Logger) -> Self {
        let request_timeout = match config.timeouts.request_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let supervisor = Self::new(SupervisorConfig {
            listen_address: config.listener.bind_address.clone(),
            logger: Some(logger),
            signals: SignalHandling::Os,
            request_timeout,
            max_in_flight: Some(config.listener.max_in_flight),
        });

        if config.profiling.enabled {
            supervisor.state().profiling = Some(config.profiling.bind_address.clone());
        }
        supervisor
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn idle_state(&self) -> Result<MutexGuard<'_, State>, SupervisorError> {
        let state = self.state();
        if state.run.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }
        Ok(state)
    }

    /// Register `handler` under `pattern` on the main listener.
    ///
    /// Patterns use axum syntax (`/users/{id}`, `/files/{*path}`).
    pub fn handle(&self, pattern: &str, handler: MethodRouter) -> Result<(), SupervisorError> {
        self.register(pattern, |routes| routes.route(pattern, handler))
    }

    /// Register a tower service under `pattern` on the main listener.
    pub fn handle_service<T>(&self, pattern: &str, service: T) -> Result<(), SupervisorError>
    where
        T: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        T::Response: IntoResponse,
        T::Future: Send + 'static,
    {
        self.register(pattern, |routes| routes.route_service(pattern, service))
    }

    fn register(
        &self,
        pattern: &str,
        add: impl FnOnce(Router) -> Router,
    ) -> Result<(), SupervisorError> {
        let mut state = self.idle_state()?;
        if state.merged {
            return Err(SupervisorError::MixedRegistration);
        }
        validate_pattern(pattern)?;
        let conflict = || SupervisorError::DuplicatePattern(pattern.to_owned());

        let shape = route_shape(pattern);
        if state.patterns.contains(&shape) {
            return Err(conflict());
        }
        // Conflicts the shape check cannot see still panic inside axum; the
        // registered routes are only replaced once insertion succeeded.
        let current = state.routes.clone();
        let routes = panic::catch_unwind(AssertUnwindSafe(|| add(current)))
            .map_err(|_| conflict())?;
        state.routes = routes;
        state.patterns.insert(shape);
        Ok(())
    }

    /// Serve an externally built router on the main listener.
    ///
    /// The router owns the whole path space: it cannot be combined with
    /// [`Supervisor::handle`] registrations or a second merge.
    pub fn merge(&self, router: Router) -> Result<(), SupervisorError> {
        let mut state = self.idle_state()?;
        if state.merged || !state.patterns.is_empty() {
            return Err(SupervisorError::MixedRegistration);
        }
        state.routes = state.routes.clone().merge(router);
        state.merged = true;
        Ok(())
    }

    /// Wrap every route registered so far with `layer`.
    pub fn layer<L>(&self, layer: L) -> Result<(), SupervisorError>
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        let mut state = self.idle_state()?;
        state.routes = state.routes.clone().layer(layer);
        Ok(())
    }

    /// Also serve the `/debug/` endpoints on `address` during the next run.
    pub fn enable_profiling(&self, address: impl Into<String>) -> Result<(), SupervisorError> {
        self.idle_state()?.profiling = Some(address.into());
        Ok(())
    }

    /// Expose `handle` as `/debug/metrics` on the profiling listener.
    pub fn set_prometheus(&self, handle: PrometheusHandle) -> Result<(), SupervisorError> {
        self.idle_state()?.prometheus = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state().run.is_some()
    }

    /// Counters of the main listener's requests, across runs.
    pub fn requests(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Watch the bound addresses, e.g. to learn the port picked for `:0`.
    pub fn listening(&self) -> watch::Receiver<Listening> {
        self.listening.subscribe()
    }

    /// Cancel the active run, if any. Does not wait for the drain.
    pub fn stop(&self) {
        if let Some(token) = &self.state().run {
            token.cancel();
        }
    }

    /// Serve until `parent` is cancelled, [`Supervisor::stop`] is called, a
    /// shutdown signal arrives or a listener fails.
    ///
    /// Returns `Ok(())` for every requested shutdown and the first listener
    /// failure otherwise. Only returns once every listener has drained.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), SupervisorError> {
        self.logger.scope(self.run(parent)).await
    }

    async fn run(&self, parent: &CancellationToken) -> Result<(), SupervisorError> {
        let Run {
            active,
            bridge,
            routes,
            profiling,
            prometheus,
        } = self.begin(parent)?;

        let options = AppOptions {
            request_timeout: self.config.request_timeout,
        };
        let app = build_app(routes, &options, self.tracker.clone());

        let mut group = TaskGroup::new(active.token.clone());

        let address = self.config.listen_address.clone();
        tracing::info!(addr = %address, "Starting server");
        let main = ListenerTask::new("main", address, app)
            .with_announce(self.announce(|listening, addr| listening.main = addr));
        group.spawn("main", move |token| main.serve(token));

        if let Some(address) = profiling {
            tracing::info!(
                addr = %address,
                example_cmd = %format!("curl http://{address}/debug/status"),
                "Starting profiler"
            );
            let router = profiling::router(ProfilingState::new(self.tracker.clone(), prometheus));
            let task = ListenerTask::new("profiling", address, router)
                .with_announce(self.announce(|listening, addr| listening.profiling = addr));
            group.spawn("profiling", move |token| task.serve(token));
        }

        let outcome = group.wait().await;
        bridge.disarm().await;
        drop(active);

        match outcome {
            Ok(()) => {
                tracing::info!("Shut down gracefully");
                Ok(())
            }
            Err(err) if err.is_benign() => {
                tracing::info!("Shut down gracefully");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, reason = err.as_label(), "Server stopped");
                Err(SupervisorError::Serve(err))
            }
        }
    }

    /// Idle → Running. Arms the signal bridge and snapshots the routes.
    fn begin(&self, parent: &CancellationToken) -> Result<Run<'_>, SupervisorError> {
        let mut state = self.idle_state()?;
        let (token, bridge) =
            lifecycle::arm(parent, &self.config.signals).map_err(SupervisorError::Signals)?;
        state.run = Some(token.clone());

        Ok(Run {
            active: ActiveRun {
                supervisor: self,
                token,
            },
            bridge,
            routes: state.routes.clone(),
            profiling: state.profiling.clone(),
            prometheus: state.prometheus.clone(),
        })
    }

    fn announce(
        &self,
        update: impl Fn(&mut Listening, Option<SocketAddr>) + Send + Sync + 'static,
    ) -> Announce {
        let listening = Arc::clone(&self.listening);
        Box::new(move |addr| listening.send_modify(|current| update(current, addr)))
    }
}

/// `/users/{id}` and `/users/{name}` route the same requests.
fn route_shape(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix('{') {
            Some(capture) if capture.starts_with('*') => "{*}",
            Some(_) => "{}",
            None => segment,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Accepts the patterns axum's router accepts without panicking: absolute,
/// `{name}` captures that fill a whole segment, and a `{*name}` catch-all
/// only as the final segment.
fn validate_pattern(pattern: &str) -> Result<(), SupervisorError> {
    let invalid = || SupervisorError::InvalidPattern(pattern.to_owned());

    let Some(rest) = pattern.strip_prefix('/') else {
        return Err(invalid());
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;

    for (index, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(invalid());
        }
        let opens = segment.matches('{').count();
        let closes = segment.matches('}').count();
        if opens != closes {
            return Err(invalid());
        }
        if opens == 0 {
            continue;
        }
        // Escaped braces are not supported; a capture is a whole segment.
        let Some(name) = segment
            .strip_prefix('{')
            .and_then(|inner| inner.strip_suffix('}'))
        else {
            return Err(invalid());
        };
        let name = match name.strip_prefix('*') {
            Some(_) if index != last => return Err(invalid()),
            Some(name) => name,
            None => name,
        };
        let well_formed = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !well_formed {
            return Err(invalid());
        }
    }
    Ok(())
}
