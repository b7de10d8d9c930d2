//! Diagnostic endpoints served by the optional profiling listener.
//!
//! Everything lives under `/debug/`; any other path answers 404. The
//! listener is meant for loopback or an internal network only, so there is
//! no authentication layer.

pub mod handlers;

use axum::{http::StatusCode, routing::get, Router};

use crate::http::error::status_response;
use self::handlers::*;

pub use self::handlers::ProfilingState;

pub fn router(state: ProfilingState) -> Router {
    Router::new()
        .route("/debug", get(get_index))
        .route("/debug/", get(get_index))
        .route("/debug/status", get(get_status))
        .route("/debug/runtime", get(get_runtime))
        .route("/debug/requests", get(get_requests))
        .route("/debug/metrics", get(get_metrics))
        .fallback(|| async { status_response(StatusCode::NOT_FOUND) })
        .with_state(state)
}
