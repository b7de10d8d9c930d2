//! Per-request logging middleware.
//!
//! Each request gets a server-side id (UUID v4) and, when the client sent
//! one, its `X-Request-ID`. Both go on a `req` span together with method
//! and path, so anything logged further down the stack (auth, handlers)
//! carries them. Two events frame the request: "HTTP req" on arrival and
//! "HTTP rsp" with status and duration once the response is produced.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Level;
use uuid::Uuid;

use crate::observability::{metrics, Logger};

/// Header a client may use to correlate its own request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Server-generated id, available to handlers as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerRequestId(pub Uuid);

/// Configuration for [`request_log`].
#[derive(Debug, Clone)]
pub struct RequestLog {
    logger: Logger,
    level: Level,
}

impl RequestLog {
    pub fn new(logger: Logger, level: Level) -> Self {
        Self { logger, level }
    }
}

macro_rules! event_at {
    ($level:expr, $($rest:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($rest)+),
            Level::WARN => tracing::warn!($($rest)+),
            Level::INFO => tracing::info!($($rest)+),
            Level::DEBUG => tracing::debug!($($rest)+),
            _ => tracing::trace!($($rest)+),
        }
    };
}

/// Middleware: use with `axum::middleware::from_fn_with_state(RequestLog, request_log)`.
pub async fn request_log(
    State(config): State<RequestLog>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let server_id = Uuid::new_v4();
    let client_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    request.extensions_mut().insert(ServerRequestId(server_id));

    let span = config.logger.in_scope(|| match &client_id {
        Some(cli_id) => tracing::info_span!(
            "req",
            srv_id = %server_id,
            cli_id = %cli_id,
            method = %method,
            path = %path,
        ),
        None => tracing::info_span!("req", srv_id = %server_id, method = %method, path = %path),
    });

    let level = config.level;
    let mut response = config
        .logger
        .scope_span(
            async move {
                event_at!(level, "HTTP req");
                let response = next.run(request).await;
                event_at!(
                    level,
                    status = response.status().as_u16(),
                    dur = ?start.elapsed(),
                    "HTTP rsp"
                );
                response
            },
            span,
        )
        .await;

    metrics::record_request(method.as_str(), response.status().as_u16(), start);

    if let Ok(value) = HeaderValue::from_str(&server_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::capture;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(logger: Logger) -> Router {
        Router::new()
            .route(
                "/teapot",
                get(|| async {
                    tracing::info!("inside handler");
                    (StatusCode::IM_A_TEAPOT, "short and stout")
                }),
            )
            .layer(middleware::from_fn_with_state(
                RequestLog::new(logger, Level::INFO),
                request_log,
            ))
    }

    #[tokio::test]
    async fn logs_request_and_response_status() {
        let (logger, captured) = capture::logger();
        let response = app(logger)
            .oneshot(Request::get("/teapot").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(response.headers().contains_key(X_REQUEST_ID));

        let lines = captured.messages();
        assert_eq!(lines[0], "HTTP req");
        assert!(captured.contains("inside handler"));
        let rsp = lines.iter().find(|l| l.starts_with("HTTP rsp")).unwrap();
        assert!(rsp.contains("status=418"), "{rsp}");
    }

    #[tokio::test]
    async fn server_id_is_exposed_to_handlers() {
        let router = Router::new()
            .route(
                "/",
                get(|axum::Extension(id): axum::Extension<ServerRequestId>| async move {
                    id.0.to_string()
                }),
            )
            .layer(middleware::from_fn_with_state(
                RequestLog::new(Logger::Noop, Level::DEBUG),
                request_log,
            ));

        let response = router
            .oneshot(
                Request::get("/")
                    .header(X_REQUEST_ID, "client-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response.headers()[X_REQUEST_ID].to_str().unwrap().to_owned();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(header.as_bytes(), &body[..]);
    }

    #[tokio::test]
    async fn noop_logger_still_serves() {
        let response = app(Logger::Noop)
            .oneshot(Request::get("/teapot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
