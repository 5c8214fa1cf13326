//! HTTP parameter pollution guard.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::errors::ApiError;

/// Query keys that may legitimately repeat.
#[derive(Clone, Debug, Default)]
pub struct ParameterWhitelist(HashSet<String>);

impl ParameterWhitelist {
    /// Build from configured keys.
    pub fn new<I: IntoIterator<Item = String>>(keys: I) -> Self {
        Self(keys.into_iter().collect())
    }

    fn allows(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

/// First query key that repeats without being whitelisted.
pub fn repeated_key(pairs: &[(String, String)], whitelist: &ParameterWhitelist) -> Option<String> {
    let mut seen = HashSet::new();
    pairs
        .iter()
        .map(|(k, _)| k.as_str())
        .find(|k| !seen.insert(*k) && !whitelist.allows(k))
        .map(ToOwned::to_owned)
}

/// Rejects requests whose query string repeats a non-whitelisted key.
pub async fn reject_polluted_query(
    State(whitelist): State<Arc<ParameterWhitelist>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().query().is_some() {
        let pairs = match Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
            Ok(Query(pairs)) => pairs,
            Err(e) => {
                return ApiError::bad_request(format!("Malformed query string: {}", e.body_text()))
                    .into_response();
            }
        };
        if let Some(key) = repeated_key(&pairs, &whitelist) {
            debug!(key = %key, path = %request.uri().path(), "rejecting repeated query parameter");
            return ApiError::bad_request(format!("Query parameter '{key}' may not repeat"))
                .into_response();
        }
    }
    next.run(request).await
}
