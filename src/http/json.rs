//! JSON request bodies with client-friendly error messages.
//!
//! [`JsonBody`] is a drop-in for `axum::Json` on the request side. Instead of
//! serde's internal wording it answers with messages a client can act on,
//! and with the status that fits: 415 for a wrong media type, 413 above
//! [`MAX_BODY_BYTES`], 400 for everything else.
//!
//! Unknown-field rejection only happens for targets declared with
//! `#[serde(deny_unknown_fields)]`.

use axum::{
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use thiserror::Error;

use crate::http::error::text_error;

/// Largest accepted body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A request body that could not be turned into the expected value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MalformedRequest {
    pub status: StatusCode,
    pub message: String,
}

impl MalformedRequest {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for MalformedRequest {
    fn into_response(self) -> Response {
        text_error(self.status, &self.message)
    }
}

/// Extractor that decodes a single JSON value from the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = MalformedRequest;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        check_content_type(&req)?;

        let too_large = || {
            MalformedRequest::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body must not be larger than 1MB",
            )
        };

        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
            return Err(too_large());
        }

        let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|err| {
                if is_length_limit(&err) {
                    too_large()
                } else {
                    MalformedRequest::bad_request("Request body could not be read")
                }
            })?;

        decode_json(&bytes).map(JsonBody)
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&dyn std::error::Error> = Some(err);
    while let Some(current) = source {
        if current.to_string().contains("length limit exceeded") {
            return true;
        }
        source = current.source();
    }
    false
}

fn check_content_type(req: &Request) -> Result<(), MalformedRequest> {
    let Some(value) = req.headers().get(header::CONTENT_TYPE) else {
        return Ok(());
    };

    let media_type = value
        .to_str()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media_type == "application/json" {
        Ok(())
    } else {
        Err(MalformedRequest::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type header is not application/json",
        ))
    }
}

/// Decode exactly one JSON value from `bytes`.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MalformedRequest> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(MalformedRequest::bad_request("Request body must not be empty"));
    }

    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = T::deserialize(&mut de).map_err(describe)?;

    de.end().map_err(|_| {
        MalformedRequest::bad_request("Request body must only contain a single JSON object")
    })?;

    Ok(value)
}

fn describe(err: serde_json::Error) -> MalformedRequest {
    let text = err.to_string();
    let detail = text.split(" at line ").next().unwrap_or(&text);

    let message = match err.classify() {
        Category::Syntax => format!(
            "Request body contains badly-formed JSON (at line {} column {})",
            err.line(),
            err.column()
        ),
        Category::Eof => "Request body contains badly-formed JSON".to_string(),
        Category::Data => match backticked(detail, "unknown field `") {
            Some(field) => format!("Request body contains unknown field \"{field}\""),
            None => match backticked(detail, "missing field `") {
                Some(field) => format!("Request body is missing field \"{field}\""),
                None => format!(
                    "Request body contains an invalid value: {detail} (at line {} column {})",
                    err.line(),
                    err.column()
                ),
            },
        },
        Category::Io => "Request body could not be read".to_string(),
    };

    MalformedRequest::bad_request(message)
}

fn backticked<'a>(detail: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = detail.strip_prefix(prefix)?;
    rest.split('`').next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::post, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Item {
        name: String,
        count: u32,
    }

    fn message(bytes: &str) -> String {
        decode_json::<Item>(bytes.as_bytes()).unwrap_err().message
    }

    #[test]
    fn decodes_single_object() {
        let item: Item = decode_json(br#"{"name":"a","count":2}"#).unwrap();
        assert_eq!(
            item,
            Item {
                name: "a".into(),
                count: 2
            }
        );
    }

    #[test]
    fn empty_body() {
        assert_eq!(message("  \n"), "Request body must not be empty");
    }

    #[test]
    fn badly_formed_json_reports_position() {
        let msg = message(r#"{"name": "a",, "count": 1}"#);
        assert!(
            msg.starts_with("Request body contains badly-formed JSON (at line 1 column "),
            "{msg}"
        );
    }

    #[test]
    fn truncated_json() {
        assert_eq!(
            message(r#"{"name": "a""#),
            "Request body contains badly-formed JSON"
        );
    }

    #[test]
    fn wrong_type_is_invalid_value() {
        let msg = message(r#"{"name": "a", "count": "lots"}"#);
        assert!(
            msg.starts_with("Request body contains an invalid value: invalid type: string"),
            "{msg}"
        );
    }

    #[test]
    fn unknown_field() {
        assert_eq!(
            message(r#"{"name": "a", "count": 1, "colour": "red"}"#),
            "Request body contains unknown field \"colour\""
        );
    }

    #[test]
    fn missing_field() {
        assert_eq!(
            message(r#"{"name": "a"}"#),
            "Request body is missing field \"count\""
        );
    }

    #[test]
    fn trailing_value() {
        assert_eq!(
            message(r#"{"name": "a", "count": 1}{"name": "b", "count": 2}"#),
            "Request body must only contain a single JSON object"
        );
    }

    fn app() -> Router {
        Router::new().route(
            "/items",
            post(|JsonBody(item): JsonBody<Item>| async move { item.name }),
        )
    }

    #[tokio::test]
    async fn extractor_accepts_json_with_charset() {
        let response = app()
            .oneshot(
                Request::post("/items")
                    .header(header::CONTENT_TYPE, "Application/JSON; charset=utf-8")
                    .body(Body::from(r#"{"name":"widget","count":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn extractor_rejects_other_media_types() {
        let response = app()
            .oneshot(
                Request::post("/items")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn extractor_rejects_oversized_body() {
        let body = format!(r#"{{"name":"{}","count":1}}"#, "x".repeat(MAX_BODY_BYTES));
        let response = app()
            .oneshot(Request::post("/items").body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
