//! In-flight request tracking.
//!
//! # Responsibilities
//! - Count requests currently being served by the main listener
//! - Count requests served since the tracker was created
//! - Feed `/debug/requests` and the in-flight gauge
//! - Optionally cap how many requests are served at once
//!
//! # Design Decisions
//! - A guard per request decrements on drop, so panics and timeouts still
//!   release the slot
//! - The cap is a semaphore: over the limit, requests wait for a slot
//!   instead of being rejected

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// Shared counters for one listener's requests.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    active: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    limit: Option<Arc<Semaphore>>,
}

/// Point-in-time view of a [`RequestTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub in_flight: u64,
    pub total: u64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that lets at most `max_in_flight` requests through at once.
    pub fn with_limit(max_in_flight: usize) -> Self {
        Self {
            limit: Some(Arc::new(Semaphore::new(max_in_flight))),
            ..Self::default()
        }
    }

    /// Record a new request. Returns a guard that decrements on drop.
    pub fn track(&self) -> RequestGuard {
        self.guard(None)
    }

    /// Wait for a free slot (if limited), then track the request.
    pub async fn admit(&self) -> RequestGuard {
        let permit = match &self.limit {
            Some(limit) => limit.clone().acquire_owned().await.ok(),
            None => None,
        };
        self.guard(permit)
    }

    fn guard(&self, permit: Option<OwnedSemaphorePermit>) -> RequestGuard {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.total.fetch_add(1, Ordering::Relaxed);
        metrics::record_in_flight(active);
        RequestGuard {
            active: Arc::clone(&self.active),
            _permit: permit,
        }
    }

    /// Free slots under the cap, or `None` when unlimited.
    pub fn available_permits(&self) -> Option<usize> {
        self.limit.as_ref().map(|limit| limit.available_permits())
    }

    pub fn in_flight(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RequestStats {
        RequestStats {
            in_flight: self.in_flight(),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

/// Guard that tracks a request's lifetime.
#[derive(Debug)]
pub struct RequestGuard {
    active: Arc<AtomicU64>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let left = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_in_flight(left);
    }
}

/// Middleware holding a [`RequestGuard`] for the duration of each request.
pub async fn track_requests(
    State(tracker): State<RequestTracker>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = tracker.admit().await;
    next.run(request).await
}
