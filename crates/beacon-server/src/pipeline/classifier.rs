//! Terminal stages: the not-found catch-all and the error classifier.
//!
//! The classifier wraps every other stage. Any failing response passes
//! through it exactly once, gets logged at error level, and leaves with a
//! status and a structured body.

use std::any::Any;

use axum::extract::Request;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::error;

use crate::errors::{ApiError, ErrorReport};
use crate::metrics::HTTP_FAILURES_TOTAL;

/// Longest upstream rejection text reused as a client message.
const MAX_REJECTION_TEXT: usize = 512;

/// Fallback route: 404 naming the unmatched path.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::route_not_found(uri.path())
}

/// Converts a handler panic into an unclassified 500.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    ApiError::Unclassified(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}

/// Logs every failing response and gives unstructured ones a structured
/// body.
pub async fn classify_failures(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;

    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    if let Some(report) = response.extensions().get::<ErrorReport>() {
        log_failure(&method, &path, status, report);
        return response;
    }

    if is_json(response.headers()) {
        error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            classified = true,
            "request failed"
        );
        counter!(HTTP_FAILURES_TOTAL, "class" => "classified").increment(1);
        return response;
    }

    let rewritten = restructure(response).await;
    if let Some(report) = rewritten.extensions().get::<ErrorReport>() {
        log_failure(&method, &path, status, report);
    }
    rewritten
}

fn log_failure(method: &axum::http::Method, path: &str, status: StatusCode, report: &ErrorReport) {
    if report.classified {
        error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            code = %report.code,
            classified = true,
            "request failed"
        );
        counter!(HTTP_FAILURES_TOTAL, "class" => "classified").increment(1);
    } else {
        error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            code = %report.code,
            classified = false,
            error = %report.detail,
            "request failed"
        );
        counter!(HTTP_FAILURES_TOTAL, "class" => "unclassified").increment(1);
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Rebuild a bare failure as an [`ApiError`] response, keeping headers
/// added by earlier stages.
async fn restructure(response: Response) -> Response {
    let status = response.status();
    let (parts, body) = response.into_parts();

    let encoded = parts.headers.contains_key(CONTENT_ENCODING);
    let text = if encoded {
        None
    } else {
        axum::body::to_bytes(body, MAX_REJECTION_TEXT * 4)
            .await
            .ok()
            .and_then(|b| String::from_utf8(b.to_vec()).ok())
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty() && s.len() <= MAX_REJECTION_TEXT)
    };
    let message = text.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_owned()
    });

    let mut rewritten = ApiError::from_status(status, message).into_response();
    for (name, value) in &parts.headers {
        if name != CONTENT_TYPE && name != CONTENT_LENGTH && name != CONTENT_ENCODING {
            rewritten.headers_mut().append(name.clone(), value.clone());
        }
    }
    rewritten
}
