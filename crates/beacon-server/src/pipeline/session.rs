//! Session cookie stage.
//!
//! Issues an opaque identifier when the request carries none. What the
//! identifier maps to is up to the routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::SET_COOKIE;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use beacon_settings::SessionCookieSettings;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest identifier accepted from a client.
const MAX_ID_LEN: usize = 128;

/// Session identifier, inserted as a request extension.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    fn parse(value: &str) -> Option<Self> {
        let valid = !value.is_empty()
            && value.len() <= MAX_ID_LEN
            && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(value.to_owned()))
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reads the session cookie, or issues one on the response.
pub async fn session_cookie(
    State(settings): State<Arc<SessionCookieSettings>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(id) = jar
        .get(&settings.cookie_name)
        .and_then(|c| SessionId::parse(c.value()))
    {
        let _ = request.extensions_mut().insert(id);
        return next.run(request).await;
    }

    let id = SessionId::generate();
    let _ = request.extensions_mut().insert(id.clone());
    let mut response = next.run(request).await;

    let cookie = Cookie::build((settings.cookie_name.clone(), id.0))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.secure)
        .build();
    let header = format!("{cookie}; Max-Age={}", settings.max_age_secs);
    match HeaderValue::from_str(&header) {
        Ok(value) => {
            debug!(cookie = %settings.cookie_name, "issued session cookie");
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "could not encode session cookie"),
    }
    response
}
