//! Cross-origin policy shared by the HTTP CORS stage and the WebSocket
//! origin check.

use std::time::Duration;

use axum::http::{HeaderValue, Method};
use beacon_settings::CorsSettings;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;

/// Resolved cross-origin policy.
#[derive(Clone, Debug)]
pub struct CorsPolicy {
    any_origin: bool,
    origins: Vec<String>,
    methods: Vec<Method>,
    allow_credentials: bool,
    max_age: Duration,
}

impl CorsPolicy {
    /// Build from settings. Unparseable origins and methods are skipped
    /// with a warning. A wildcard origin disables credentials.
    pub fn from_settings(settings: &CorsSettings) -> Self {
        let any_origin = settings.origins.iter().any(|o| o == "*");
        let origins = settings
            .origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| {
                let trimmed = o.trim().trim_end_matches('/');
                if HeaderValue::from_str(trimmed).is_ok() {
                    Some(trimmed.to_owned())
                } else {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        let methods = settings
            .methods
            .iter()
            .filter_map(|m| match Method::from_bytes(m.to_ascii_uppercase().as_bytes()) {
                Ok(method) => Some(method),
                Err(_) => {
                    warn!(method = %m, "ignoring invalid CORS method");
                    None
                }
            })
            .collect();
        if any_origin && settings.allow_credentials {
            warn!("wildcard CORS origin configured; credentials disabled");
        }
        Self {
            any_origin,
            origins,
            methods,
            allow_credentials: settings.allow_credentials && !any_origin,
            max_age: Duration::from_secs(settings.max_age_secs),
        }
    }

    /// Policy that accepts any origin without credentials.
    pub fn permissive() -> Self {
        Self {
            any_origin: true,
            origins: Vec::new(),
            methods: vec![Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            allow_credentials: false,
            max_age: Duration::from_secs(600),
        }
    }

    /// Whether a request carrying `origin` may proceed. Requests without an
    /// `Origin` header are not cross-origin and always pass.
    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.any_origin => true,
            Some(origin) => {
                let origin = origin.trim_end_matches('/');
                self.origins.iter().any(|o| o.eq_ignore_ascii_case(origin))
            }
        }
    }

    /// Whether credentials may cross origins.
    pub fn allow_credentials(&self) -> bool {
        self.allow_credentials
    }

    /// The HTTP CORS stage.
    pub fn layer(&self) -> CorsLayer {
        let origin = if self.any_origin {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok()),
            )
        };
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(AllowMethods::list(self.methods.iter().cloned()))
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(self.allow_credentials)
            .max_age(self.max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(origins: &[&str]) -> CorsSettings {
        CorsSettings {
            origins: origins.iter().map(ToString::to_string).collect(),
            ..CorsSettings::default()
        }
    }

    #[test]
    fn listed_origin_allowed() {
        let policy = CorsPolicy::from_settings(&settings(&["https://app.example.com/"]));
        assert!(policy.allows_origin(Some("https://app.example.com")));
        assert!(policy.allows_origin(Some("HTTPS://APP.EXAMPLE.COM")));
        assert!(!policy.allows_origin(Some("https://evil.example.com")));
    }

    #[test]
    fn missing_origin_allowed() {
        let policy = CorsPolicy::from_settings(&settings(&["https://app.example.com"]));
        assert!(policy.allows_origin(None));
    }

    #[test]
    fn wildcard_disables_credentials() {
        let policy = CorsPolicy::from_settings(&settings(&["*"]));
        assert!(policy.allows_origin(Some("https://anything.test")));
        assert!(!policy.allow_credentials());
    }

    #[test]
    fn invalid_entries_skipped() {
        let cfg = CorsSettings {
            origins: vec!["bad\norigin".into(), "http://ok.test".into()],
            methods: vec!["GET".into(), "BAD METHOD".into()],
            ..CorsSettings::default()
        };
        let policy = CorsPolicy::from_settings(&cfg);
        assert_eq!(policy.origins, vec!["http://ok.test"]);
        assert_eq!(policy.methods, vec![Method::GET]);
    }

    #[test]
    fn layer_builds_with_credentials() {
        let policy = CorsPolicy::from_settings(&settings(&["http://localhost:3000"]));
        assert!(policy.allow_credentials());
        let _layer = policy.layer();
    }
}
