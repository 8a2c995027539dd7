//! Cross-origin policy for the browser frontends.
//!
//! Browsers send credentials (the bearer header) cross-origin, so the
//! allowed origin is echoed back instead of `*`. An origin is allowed when:
//! - it is in the built-in list or `ALLOWED_ORIGINS`
//! - it is a Vercel preview deployment of the frontend
//! - the server runs with `ENVIRONMENT=development`
//!
//! Pre-flight `OPTIONS` requests are answered by the layer for every route.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use axum::http::{HeaderValue, Method};
use regex::Regex;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::Config;

pub const DEFAULT_ORIGINS: &[&str] = &[
    // Local development
    "http://localhost:3000",
    "http://localhost:5173",
    "http://localhost:4173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
    "http://127.0.0.1:4173",
    // Production domains
    "https://mysunshinestory.ai",
    "https://www.mysunshinestory.ai",
    "https://mysunshinestories.com",
    "https://www.mysunshinestories.com",
    // Vercel
    "https://my-sunshine-stories-frontend.vercel.app",
    "https://my-sunshine-stories-frontend-ojb3dgk92-aerware-ai.vercel.app",
    // Railway
    "https://luciantales-production.up.railway.app",
    "https://steadfast-inspiration-production.up.railway.app",
];

static VERCEL_PREVIEW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://[a-z0-9-]+-aerware-ai\.vercel\.app$").unwrap());

pub const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::PATCH,
];

const MAX_AGE: Duration = Duration::from_secs(3600);

/// Built-in origins followed by `ALLOWED_ORIGINS`, first occurrence kept.
pub fn allowed_origins(config: &Config) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    for origin in DEFAULT_ORIGINS
        .iter()
        .map(|o| o.to_string())
        .chain(config.extra_origins())
    {
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }
    origins
}

pub fn is_vercel_preview_deployment(origin: &str) -> bool {
    VERCEL_PREVIEW.is_match(origin)
}

/// The origin decision, shared by the CORS layer and `/api/v1/cors-test`.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<String>,
    development: bool,
}

impl CorsPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            origins: allowed_origins(config),
            development: config.is_development(),
        }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn should_allow_origin(&self, origin: &str) -> bool {
        if origin.is_empty() {
            return false;
        }

        self.origins.iter().any(|allowed| allowed == origin)
            || is_vercel_preview_deployment(origin)
            || self.development
    }
}

pub fn cors_layer(config: &Config) -> CorsLayer {
    let policy = Arc::new(CorsPolicy::from_config(config));
    tracing::info!("CORS allows {} configured origins", policy.origins().len());

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts| {
                origin
                    .to_str()
                    .map(|origin| policy.should_allow_origin(origin))
                    .unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(MAX_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_origins_are_appended_without_duplicates() {
        let mut config = Config::for_tests();
        config.allowed_origins =
            Some("https://staging.mysunshinestory.ai, http://localhost:3000".to_string());

        let origins = allowed_origins(&config);
        assert_eq!(origins.len(), DEFAULT_ORIGINS.len() + 1);
        assert_eq!(origins[0], "http://localhost:3000");
        assert_eq!(origins.last().unwrap(), "https://staging.mysunshinestory.ai");
    }

    #[test]
    fn vercel_previews_match_only_the_team_domain() {
        assert!(is_vercel_preview_deployment(
            "https://my-sunshine-stories-frontend-abc123-aerware-ai.vercel.app"
        ));
        assert!(is_vercel_preview_deployment("https://mysunshinestories-x9-aerware-ai.vercel.app"));

        assert!(!is_vercel_preview_deployment("https://evil-aerware-ai.vercel.app.attacker.com"));
        assert!(!is_vercel_preview_deployment("http://app-aerware-ai.vercel.app"));
        assert!(!is_vercel_preview_deployment("https://app-other-team.vercel.app"));
    }

    #[test]
    fn production_allows_only_known_origins() {
        let policy = CorsPolicy::from_config(&Config::for_tests());

        assert!(policy.should_allow_origin("https://mysunshinestory.ai"));
        assert!(policy.should_allow_origin("https://feature-aerware-ai.vercel.app"));
        assert!(!policy.should_allow_origin("https://attacker.example"));
        assert!(!policy.should_allow_origin(""));
    }

    #[test]
    fn development_allows_any_origin() {
        let mut config = Config::for_tests();
        config.environment = "development".to_string();
        let policy = CorsPolicy::from_config(&config);

        assert!(policy.should_allow_origin("https://attacker.example"));
        assert!(!policy.should_allow_origin(""));
    }
}
