//! Main listener application setup.
//!
//! # Responsibilities
//! - Wrap the registered routes with the listener-wide middleware
//!   (tracing, request timeout, in-flight tracking)
//! - Answer unmatched paths with a plain 404
//!
//! # Design Decisions
//! - Routing itself belongs to axum; registered patterns are passed through
//! - Layer order, outermost first: trace → timeout → in-flight tracking

use std::time::Duration;

use axum::{http::StatusCode, middleware, Router};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::error::status_response;
use crate::http::inflight::{track_requests, RequestTracker};

/// Listener-wide options applied around the registered routes.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Abort requests that take longer than this with 408.
    pub request_timeout: Option<Duration>,
}

/// Build the router served by the main listener.
#[allow(deprecated)]
pub fn build_app(routes: Router, options: &AppOptions, tracker: RequestTracker) -> Router {
    let mut app = routes
        .fallback(|| async { status_response(StatusCode::NOT_FOUND) })
        .layer(middleware::from_fn_with_state(tracker, track_requests));

    if let Some(timeout) = options.request_timeout {
        app = app.layer(TimeoutLayer::new(timeout));
    }

    app.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn unmatched_path_is_404_with_reason() {
        let app = build_app(Router::new(), &AppOptions::default(), RequestTracker::new());
        let response = app
            .oneshot(Request::get("/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Not Found\n");
    }

    #[tokio::test]
    async fn requests_are_counted() {
        let tracker = RequestTracker::new();
        let routes = Router::new().route("/", get(|| async { "ok" }));
        let app = build_app(routes, &AppOptions::default(), tracker.clone());

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tracker.stats().total, 1);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn slow_requests_time_out() {
        let routes = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let options = AppOptions {
            request_timeout: Some(Duration::from_millis(20)),
        };
        let app = build_app(routes, &options, RequestTracker::new());

        let response = app
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
