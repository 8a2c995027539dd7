//! Shared application state handed to every handler.

use std::{sync::Arc, time::Duration};

use crate::{config::Config, db::DbPool};

/// Cloned into each request by axum's `State` extractor.
///
/// All members are cheap handles: the pool and the HTTP client are
/// reference counted internally, the config sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    /// Outbound client for OpenAI, Stripe and OAuth providers.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("sunshine-stories/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            http,
        })
    }
}
