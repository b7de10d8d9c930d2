//! Authentication middleware.
//!
//! Two schemes are supported:
//! - HTTP Basic, checked by a caller-supplied predicate
//! - Trusted headers (`Remote-User`, `Remote-Groups`, `Remote-Name`,
//!   `Remote-Email`) set by an authenticating reverse proxy
//!
//! On success the [`User`] is stored as a request extension, so handlers
//! can take `Extension<User>`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::http::error::status_response;

/// Authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub display_name: String,
    pub email: String,
    pub groups: Vec<String>,
}

type BasicCheck = dyn Fn(&Request, &str, &str) -> bool + Send + Sync;
type TrustedCheck = dyn Fn(&Request, &str, &[String]) -> bool + Send + Sync;

/// State for [`basic_auth`].
#[derive(Clone)]
pub struct BasicAuth {
    realm: String,
    authorize: Arc<BasicCheck>,
}

impl BasicAuth {
    /// `authorize` receives the request, user name and password.
    pub fn new(
        realm: impl Into<String>,
        authorize: impl Fn(&Request, &str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            realm: realm.into(),
            authorize: Arc::new(authorize),
        }
    }
}

/// State for [`trusted_header_auth`].
#[derive(Clone)]
pub struct TrustedHeaderAuth {
    authorize: Arc<TrustedCheck>,
}

impl TrustedHeaderAuth {
    /// `authorize` receives the request, `Remote-User` and every `Remote-Groups` value.
    pub fn new(
        authorize: impl Fn(&Request, &str, &[String]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            authorize: Arc::new(authorize),
        }
    }
}

fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_owned(), password.to_owned()))
}

fn header_string(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// Middleware: use with `axum::middleware::from_fn_with_state(BasicAuth, basic_auth)`.
///
/// Missing or rejected credentials get 401 with a `WWW-Authenticate`
/// challenge for the configured realm.
pub async fn basic_auth(
    State(auth): State<BasicAuth>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = basic_credentials(&request);
    let accepted = credentials
        .as_ref()
        .is_some_and(|(user, password)| {
            (auth.authorize)(&request, user.as_str(), password.as_str())
        });

    let Some((user, _)) = credentials.filter(|_| accepted) else {
        let mut response = status_response(StatusCode::UNAUTHORIZED);
        let challenge = format!("Basic realm=\"{}\"", auth.realm);
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        return response;
    };

    tracing::info!(auth.user = %user, auth.kind = "basic", "login");
    request.extensions_mut().insert(User {
        name: user,
        ..User::default()
    });
    next.run(request).await
}

/// Middleware: use with `axum::middleware::from_fn_with_state(TrustedHeaderAuth, trusted_header_auth)`.
pub async fn trusted_header_auth(
    State(auth): State<TrustedHeaderAuth>,
    mut request: Request,
    next: Next,
) -> Response {
    let name = header_string(&request, "remote-user");
    let groups: Vec<String> = request
        .headers()
        .get_all("remote-groups")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_owned)
        .collect();

    if !(auth.authorize)(&request, name.as_str(), groups.as_slice()) {
        return status_response(StatusCode::UNAUTHORIZED);
    }

    tracing::info!(auth.user = %name, auth.kind = "trusted_header", "login");
    let user = User {
        display_name: header_string(&request, "remote-name"),
        email: header_string(&request, "remote-email"),
        name,
        groups,
    };
    request.extensions_mut().insert(user);
    next.run(request).await
}
