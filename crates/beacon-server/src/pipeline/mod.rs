//! Request pipeline assembly.
//!
//! Stages run in a fixed phase order: security, then body normalization,
//! then route dispatch, then the not-found catch-all. The error classifier
//! wraps all of them so every failure passes through it.
//!
//! ```text
//!   request ──► classifier ──► security… ──► normalization… ──► routes ─┐
//!                   ▲                                        fallback ◄─┘
//!                   └──────────────────── response ◄──────────────────────
//! ```

pub mod body;
pub mod classifier;
pub mod cors;
pub mod headers;
pub mod pollution;
pub mod session;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use beacon_settings::{SecuritySettings, SessionCookieSettings};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;

pub use body::{BodyLimit, FormFields};
pub use cors::CorsPolicy;
pub use session::SessionId;

use headers::HardenHeaders;
use pollution::ParameterWhitelist;

/// Ordering group for a stage. Phases never go backwards in a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Session, headers, pollution guard, CORS.
    Security,
    /// Compression, size limit, form parsing.
    Normalization,
    /// Application routes.
    Routing,
    /// Not-found catch-all and classifier.
    Terminal,
}

/// One named unit of request processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Session identifier cookie.
    SessionCookie,
    /// Hardening response headers.
    HardenHeaders,
    /// Repeated query key rejection.
    ParameterPollution,
    /// CORS.
    CrossOrigin,
    /// Gzip response compression.
    Compression,
    /// Declared body size limit.
    BodyLimit,
    /// URL-encoded form parsing.
    UrlEncoded,
    /// Application routes.
    RouteDispatch,
    /// 404 catch-all.
    NotFound,
    /// Terminal error classifier.
    ErrorClassifier,
}

impl PipelineStage {
    /// Default order.
    pub const DEFAULT_ORDER: [Self; 10] = [
        Self::SessionCookie,
        Self::HardenHeaders,
        Self::ParameterPollution,
        Self::CrossOrigin,
        Self::Compression,
        Self::BodyLimit,
        Self::UrlEncoded,
        Self::RouteDispatch,
        Self::NotFound,
        Self::ErrorClassifier,
    ];

    /// The phase this stage belongs to.
    pub fn phase(self) -> Phase {
        match self {
            Self::SessionCookie
            | Self::HardenHeaders
            | Self::ParameterPollution
            | Self::CrossOrigin => Phase::Security,
            Self::Compression | Self::BodyLimit | Self::UrlEncoded => Phase::Normalization,
            Self::RouteDispatch => Phase::Routing,
            Self::NotFound | Self::ErrorClassifier => Phase::Terminal,
        }
    }

    /// Stable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::SessionCookie => "session_cookie",
            Self::HardenHeaders => "harden_headers",
            Self::ParameterPollution => "parameter_pollution",
            Self::CrossOrigin => "cross_origin",
            Self::Compression => "compression",
            Self::BodyLimit => "body_limit",
            Self::UrlEncoded => "url_encoded",
            Self::RouteDispatch => "route_dispatch",
            Self::NotFound => "not_found",
            Self::ErrorClassifier => "error_classifier",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejected stage order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// A stage is listed twice.
    #[error("stage {0} appears more than once")]
    DuplicateStage(PipelineStage),

    /// A stage is not listed.
    #[error("stage {0} is missing")]
    MissingStage(PipelineStage),

    /// A stage is listed after a stage of a later phase.
    #[error("stage {stage} ({stage_phase:?}) cannot follow {previous} ({previous_phase:?})")]
    PhaseOrder {
        /// Offending stage.
        stage: PipelineStage,
        /// Its phase.
        stage_phase: Phase,
        /// Stage it follows.
        previous: PipelineStage,
        /// Phase of that stage.
        previous_phase: Phase,
    },

    /// The classifier is not last, or the catch-all does not precede it.
    #[error("pipeline must end with not_found then error_classifier")]
    TerminalOrder,
}

/// Everything the stages need, resolved from settings.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Shared with the real-time gateway origin check.
    pub cors: CorsPolicy,
    /// Session cookie issuance.
    pub session: SessionCookieSettings,
    /// Query keys allowed to repeat.
    pub parameter_whitelist: Vec<String>,
    /// Maximum body size in bytes.
    pub body_limit_bytes: usize,
    /// Gzip responses.
    pub compression: bool,
    /// Send `Strict-Transport-Security`.
    pub hsts: bool,
}

impl PipelineOptions {
    /// Resolve from the security settings section.
    pub fn from_settings(security: &SecuritySettings) -> Self {
        Self {
            cors: CorsPolicy::from_settings(&security.cors),
            session: security.session.clone(),
            parameter_whitelist: security.parameter_whitelist.clone(),
            body_limit_bytes: security.body_limit_bytes,
            compression: security.compression,
            hsts: security.hsts,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&SecuritySettings::default())
    }
}

/// Validate a custom stage order.
pub fn validate_order(stages: &[PipelineStage]) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(*stage) {
            return Err(PipelineError::DuplicateStage(*stage));
        }
    }
    if let Some(missing) = PipelineStage::DEFAULT_ORDER
        .iter()
        .find(|s| !seen.contains(*s))
    {
        return Err(PipelineError::MissingStage(*missing));
    }
    for pair in stages.windows(2) {
        let (previous, stage) = (pair[0], pair[1]);
        if stage.phase() < previous.phase() {
            return Err(PipelineError::PhaseOrder {
                stage,
                stage_phase: stage.phase(),
                previous,
                previous_phase: previous.phase(),
            });
        }
    }
    if stages[stages.len() - 2..] != [PipelineStage::NotFound, PipelineStage::ErrorClassifier] {
        return Err(PipelineError::TerminalOrder);
    }
    Ok(())
}

/// Assembles the stages around an application router.
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
    options: PipelineOptions,
    stages: Vec<PipelineStage>,
}

impl PipelineBuilder {
    /// Builder with the default stage order.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            stages: PipelineStage::DEFAULT_ORDER.to_vec(),
        }
    }

    /// Replace the stage order. Security and normalization stages may be
    /// reordered within their phase; anything else is rejected.
    pub fn with_order(mut self, stages: Vec<PipelineStage>) -> Result<Self, PipelineError> {
        validate_order(&stages)?;
        self.stages = stages;
        Ok(self)
    }

    /// Stage order as it will run.
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Resolved options.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Wrap `routes` in every stage.
    ///
    /// Layers added later run earlier, so stages are applied from the
    /// innermost outwards. The catch-all becomes the router fallback and the
    /// classifier is applied last.
    pub fn build(&self, routes: Router) -> Router {
        let opts = &self.options;
        let mut router = routes.fallback(classifier::not_found);

        for stage in self.stages.iter().rev() {
            router = match stage {
                PipelineStage::SessionCookie => router.layer(middleware::from_fn_with_state(
                    Arc::new(opts.session.clone()),
                    session::session_cookie,
                )),
                PipelineStage::HardenHeaders => router.layer(middleware::from_fn_with_state(
                    HardenHeaders { hsts: opts.hsts },
                    headers::harden_headers,
                )),
                PipelineStage::ParameterPollution => router.layer(middleware::from_fn_with_state(
                    Arc::new(ParameterWhitelist::new(opts.parameter_whitelist.iter().cloned())),
                    pollution::reject_polluted_query,
                )),
                PipelineStage::CrossOrigin => router.layer(opts.cors.layer()),
                PipelineStage::Compression if opts.compression => {
                    router.layer(CompressionLayer::new())
                }
                PipelineStage::BodyLimit => router
                    .layer(DefaultBodyLimit::max(opts.body_limit_bytes))
                    .layer(middleware::from_fn_with_state(
                        BodyLimit(opts.body_limit_bytes),
                        body::enforce_body_limit,
                    )),
                PipelineStage::UrlEncoded => router.layer(middleware::from_fn_with_state(
                    BodyLimit(opts.body_limit_bytes),
                    body::parse_urlencoded,
                )),
                PipelineStage::Compression
                | PipelineStage::RouteDispatch
                | PipelineStage::NotFound
                | PipelineStage::ErrorClassifier => router,
            };
        }

        router
            .layer(CatchPanicLayer::custom(classifier::panic_response))
            .layer(middleware::from_fn(classifier::classify_failures))
    }
}
