//! Handlers behind the profiling router.
//!
//! Each one answers JSON except `/debug/metrics`, which renders the
//! Prometheus text format and answers 404 when no recorder was handed over.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::http::error::status_response;
use crate::http::inflight::{RequestStats, RequestTracker};

/// Shared state of the profiling router.
#[derive(Clone)]
pub struct ProfilingState {
    pub started: Instant,
    pub tracker: RequestTracker,
    pub prometheus: Option<PrometheusHandle>,
}

impl ProfilingState {
    pub fn new(tracker: RequestTracker, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            started: Instant::now(),
            tracker,
            prometheus,
        }
    }
}

#[derive(Serialize)]
pub struct ProcessStatus {
    pub version: &'static str,
    pub pid: u32,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct RuntimeStatus {
    pub workers: usize,
    pub alive_tasks: usize,
    pub global_queue_depth: usize,
}

#[derive(Serialize)]
pub struct Endpoint {
    pub path: &'static str,
    pub description: &'static str,
}

/// Endpoints listed by the `/debug/` index.
pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        path: "/debug/status",
        description: "version, pid and uptime",
    },
    Endpoint {
        path: "/debug/runtime",
        description: "async runtime worker and task counts",
    },
    Endpoint {
        path: "/debug/requests",
        description: "main listener request counters",
    },
    Endpoint {
        path: "/debug/metrics",
        description: "Prometheus exposition",
    },
];

pub async fn get_index() -> Json<&'static [Endpoint]> {
    Json(ENDPOINTS)
}

pub async fn get_status(State(state): State<ProfilingState>) -> Json<ProcessStatus> {
    Json(ProcessStatus {
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_runtime() -> Json<RuntimeStatus> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(RuntimeStatus {
        workers: metrics.num_workers(),
        alive_tasks: metrics.num_alive_tasks(),
        global_queue_depth: metrics.global_queue_depth(),
    })
}

pub async fn get_requests(State(state): State<ProfilingState>) -> Json<RequestStats> {
    Json(state.tracker.stats())
}

pub async fn get_metrics(State(state): State<ProfilingState>) -> Response {
    match &state.prometheus {
        Some(handle) => {
            handle.run_upkeep();
            handle.render().into_response()
        }
        None => status_response(StatusCode::NOT_FOUND),
    }
}
