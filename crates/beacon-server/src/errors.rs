//! Request error classification.
//!
//! Handlers and pipeline stages fail with [`ApiError`]. Classified variants
//! carry their own status and payload, which reach the client verbatim.
//! [`ApiError::Unclassified`] wraps anything else and always becomes a
//! generic 500 with no internal detail.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

// ── Error code constants ────────────────────────────────────────────

/// Malformed or rejected request.
pub const BAD_REQUEST: &str = "BAD_REQUEST";
/// Missing or invalid credentials.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
/// Authenticated but not allowed.
pub const FORBIDDEN: &str = "FORBIDDEN";
/// No route or resource.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Request body over the configured limit.
pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
/// State conflict.
pub const CONFLICT: &str = "CONFLICT";
/// Anything not classified.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Message sent to clients for every unclassified failure.
pub const GENERIC_MESSAGE: &str = "Internal server error";

/// Wire-format error body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    pub code: String,
    /// Unmatched path, for not-found responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error type returned by handlers and pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400.
    #[error("{message}")]
    BadRequest {
        /// Description.
        message: String,
    },

    /// 401.
    #[error("{message}")]
    Unauthorized {
        /// Description.
        message: String,
    },

    /// 403.
    #[error("{message}")]
    Forbidden {
        /// Description.
        message: String,
    },

    /// 404.
    #[error("{message}")]
    NotFound {
        /// Description.
        message: String,
        /// Path that matched nothing, when the failure is a missing route.
        path: Option<String>,
    },

    /// 413.
    #[error("{message}")]
    PayloadTooLarge {
        /// Description.
        message: String,
    },

    /// 409.
    #[error("{message}")]
    Conflict {
        /// Description.
        message: String,
    },

    /// Classified error with an arbitrary status and code.
    #[error("{message}")]
    Custom {
        /// HTTP status sent to the client.
        status: StatusCode,
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<serde_json::Value>,
    },

    /// Anything else. Logged in full, never shown to the client.
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl ApiError {
    /// 400 with `message`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// 403 with `message`.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// 404 identifying the unmatched `path`.
    pub fn route_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::NotFound {
            message: format!("Not found: {path}"),
            path: Some(path),
        }
    }

    /// 413 naming the limit.
    pub fn payload_too_large(limit: usize) -> Self {
        Self::PayloadTooLarge {
            message: format!("Request body exceeds {limit} bytes"),
        }
    }

    /// Structured error for a bare failing status (framework or layer
    /// rejections that produced no body of their own). A bare 5xx is not
    /// understood and becomes [`ApiError::Unclassified`].
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::BAD_REQUEST => Self::BadRequest { message },
            StatusCode::UNAUTHORIZED => Self::Unauthorized { message },
            StatusCode::FORBIDDEN => Self::Forbidden { message },
            StatusCode::NOT_FOUND => Self::NotFound {
                message,
                path: None,
            },
            StatusCode::PAYLOAD_TOO_LARGE => Self::PayloadTooLarge { message },
            StatusCode::CONFLICT => Self::Conflict { message },
            s if s.is_server_error() => {
                Self::Unclassified(anyhow::anyhow!("bare {s} response: {message}"))
            }
            s => Self::Custom {
                status: s,
                code: status_code_name(s),
                message,
                details: None,
            },
        }
    }

    /// Whether the error carries its own client-facing payload.
    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unclassified(_))
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Custom { status, .. } => *status,
            Self::Unclassified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::BadRequest { .. } => BAD_REQUEST,
            Self::Unauthorized { .. } => UNAUTHORIZED,
            Self::Forbidden { .. } => FORBIDDEN,
            Self::NotFound { .. } => NOT_FOUND,
            Self::PayloadTooLarge { .. } => PAYLOAD_TOO_LARGE,
            Self::Conflict { .. } => CONFLICT,
            Self::Custom { code, .. } => code,
            Self::Unclassified(_) => INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        if let Self::Unclassified(_) = self {
            return ErrorBody {
                message: GENERIC_MESSAGE.into(),
                code: INTERNAL_ERROR.into(),
                path: None,
                details: None,
            };
        }
        ErrorBody {
            message: self.to_string(),
            code: self.code().to_owned(),
            path: match self {
                Self::NotFound { path, .. } => path.clone(),
                _ => None,
            },
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => None,
            },
        }
    }

    fn report(&self) -> ErrorReport {
        ErrorReport {
            classified: self.is_classified(),
            code: self.code().to_owned(),
            // full chain for unclassified errors; logs only
            detail: format!("{self:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report();
        let mut response = (self.status(), Json(self.to_error_body())).into_response();
        let _ = response.extensions_mut().insert(report);
        response
    }
}

/// Response extension attached by [`ApiError`] so the terminal classifier
/// can log what happened without re-parsing the body.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    /// Whether the error was classified.
    pub classified: bool,
    /// Machine-readable code sent to the client.
    pub code: String,
    /// Full internal description.
    pub detail: String,
}

/// `METHOD_NOT_ALLOWED` style code for a status.
fn status_code_name(status: StatusCode) -> String {
    status.canonical_reason().map_or_else(
        || format!("HTTP_{}", status.as_u16()),
        |reason| {
            reason
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect()
        },
    )
}
