//! Request pipeline security and normalization settings.

use serde::{Deserialize, Serialize};

/// Settings for the security and normalization stages of the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// Cross-origin policy shared by HTTP and the real-time transport.
    pub cors: CorsSettings,
    /// Session cookie issuance.
    pub session: SessionCookieSettings,
    /// Query keys allowed to repeat.
    pub parameter_whitelist: Vec<String>,
    /// Maximum request body size in bytes.
    pub body_limit_bytes: usize,
    /// Whether responses are gzip-compressed when the client accepts it.
    pub compression: bool,
    /// Whether `Strict-Transport-Security` is sent.
    pub hsts: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            cors: CorsSettings::default(),
            session: SessionCookieSettings::default(),
            parameter_whitelist: Vec::new(),
            body_limit_bytes: 10 * 1024,
            compression: true,
            hsts: true,
        }
    }
}

/// Cross-origin resource sharing policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsSettings {
    /// Allowed origins. `["*"]` allows any origin (credentials are then disabled).
    pub origins: Vec<String>,
    /// Allowed methods.
    pub methods: Vec<String>,
    /// Whether cookies and auth headers may cross origins.
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            origins: vec!["http://localhost:3000".to_string()],
            methods: ["GET", "POST", "PUT", "PATCH", "DELETE"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            allow_credentials: true,
            max_age_secs: 600,
        }
    }
}

/// Session cookie settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionCookieSettings {
    /// Cookie name.
    pub cookie_name: String,
    /// Whether the cookie is marked `Secure`.
    pub secure: bool,
    /// Cookie lifetime in seconds.
    pub max_age_secs: i64,
}

impl Default for SessionCookieSettings {
    fn default() -> Self {
        Self {
            cookie_name: "beacon.sid".to_string(),
            secure: false,
            max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_methods() {
        let cors = CorsSettings::default();
        assert!(cors.methods.contains(&"GET".to_string()));
        assert!(cors.methods.contains(&"DELETE".to_string()));
        assert_eq!(cors.methods.len(), 5);
    }

    #[test]
    fn default_session_cookie() {
        let session = SessionCookieSettings::default();
        assert_eq!(session.cookie_name, "beacon.sid");
        assert!(!session.secure);
        assert_eq!(session.max_age_secs, 604_800);
    }

    #[test]
    fn whitelist_deserializes() {
        let cfg: SecuritySettings =
            serde_json::from_str(r#"{"parameterWhitelist": ["tag", "id"]}"#).unwrap();
        assert_eq!(cfg.parameter_whitelist, vec!["tag", "id"]);
        assert!(cfg.compression);
    }
}
