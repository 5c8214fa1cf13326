//! Body size and URL-encoded form normalization.

use axum::Form;
use axum::body::Body;
use axum::extract::{FromRequest, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::errors::ApiError;

/// Maximum accepted body size in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BodyLimit(pub usize);

/// Fields of an `application/x-www-form-urlencoded` body, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormFields(pub Vec<(String, String)>);

impl FormFields {
    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn is_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
}

/// Rejects a declared `Content-Length` over the limit before dispatch.
pub async fn enforce_body_limit(
    State(limit): State<BodyLimit>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(length) = declared_length(request.headers()).filter(|&l| l > limit.0) {
        debug!(length, limit = limit.0, "rejecting oversized body");
        return ApiError::payload_too_large(limit.0).into_response();
    }
    next.run(request).await
}

/// Parses a URL-encoded body into [`FormFields`] and puts the bytes back
/// for the route.
pub async fn parse_urlencoded(
    State(limit): State<BodyLimit>,
    request: Request,
    next: Next,
) -> Response {
    if !is_urlencoded(request.headers()) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    // read failures past the limit surface as 413
    let Ok(bytes) = axum::body::to_bytes(body, limit.0).await else {
        return ApiError::payload_too_large(limit.0).into_response();
    };

    let probe = Request::builder()
        .method(Method::POST)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(bytes.clone()));
    let fields = match probe {
        Ok(probe) => match Form::<Vec<(String, String)>>::from_request(probe, &()).await {
            Ok(Form(fields)) => fields,
            Err(rejection) => {
                return ApiError::bad_request(format!(
                    "Malformed form body: {}",
                    rejection.body_text()
                ))
                .into_response();
            }
        },
        Err(e) => return ApiError::Unclassified(e.into()).into_response(),
    };

    let _ = parts.extensions.insert(FormFields(fields));
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use axum::middleware;
    use axum::routing::post;
    use tower::ServiceExt;

    fn app(limit: usize) -> Router {
        Router::new()
            .route(
                "/form",
                post(|Extension(fields): Extension<FormFields>, body: String| async move {
                    format!("{}|{}", fields.get("name").unwrap_or("-"), body)
                }),
            )
            .route("/raw", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(BodyLimit(limit), parse_urlencoded))
            .layer(middleware::from_fn_with_state(BodyLimit(limit), enforce_body_limit))
    }

    fn form_request(uri: &str, body: &'static str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn form_fields_parsed_and_body_restored() {
        let response = app(1024)
            .oneshot(form_request("/form", "name=ada+lovelace&x=%26"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ada lovelace|name=ada+lovelace&x=%26");
    }

    #[tokio::test]
    async fn declared_oversize_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/raw")
            .header(CONTENT_LENGTH, "4096")
            .body(Body::from(vec![b'a'; 4096]))
            .unwrap();
        let response = app(16).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn undeclared_oversize_form_rejected() {
        let response = app(8)
            .oneshot(form_request("/form", "name=much-too-long-for-the-limit"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn other_content_types_untouched() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/raw")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("name=ignored"))
            .unwrap();
        let response = app(1024).oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "name=ignored");
    }

    #[test]
    fn form_fields_lookup() {
        let fields = FormFields(vec![("a".into(), "1".into()), ("a".into(), "2".into())]);
        assert_eq!(fields.get("a"), Some("1"));
        assert_eq!(fields.get("b"), None);
    }
}
