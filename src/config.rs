//! Application configuration management.
//!
//! Configuration is read from environment variables (optionally seeded from a
//! `.env` file) and deserialized with `envy` into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` or `PORT` (optional): HTTP server port, defaults to 8000
/// - `ENVIRONMENT` (optional): `development` or `production`, defaults to development
/// - `SECRET_KEY` (required): JWT signing secret
/// - `JWT_ALGORITHM`, `ACCESS_TOKEN_EXPIRE_MINUTES`, `REFRESH_TOKEN_EXPIRE_DAYS`
/// - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL`, `OPENAI_IMAGE_MODEL`
/// - `STRIPE_SECRET_KEY`, `STRIPE_PUBLISHABLE_KEY`, `STRIPE_WEBHOOK_SECRET`,
///   `STRIPE_PLUS_PRICE_ID`, `STRIPE_UNLIMITED_PRICE_ID`
/// - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `APPLE_CLIENT_ID`, `APPLE_CLIENT_SECRET`
/// - `ALLOWED_ORIGINS` (optional): comma separated list of extra CORS origins
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub server_port: Option<u16>,

    /// Port injected by PaaS hosts; `SERVER_PORT` takes precedence.
    pub port: Option<u16>,

    #[serde(default = "default_environment")]
    pub environment: String,

    pub secret_key: String,

    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    #[serde(default = "default_access_token_minutes")]
    pub access_token_expire_minutes: i64,

    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_expire_days: i64,

    /// Without a key, story generation uses the built-in fallback story.
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_openai_image_model")]
    pub openai_image_model: String,

    pub stripe_secret_key: Option<String>,

    pub stripe_publishable_key: Option<String>,

    pub stripe_webhook_secret: Option<String>,

    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    #[serde(default = "default_plus_price_id")]
    pub stripe_plus_price_id: String,

    #[serde(default = "default_unlimited_price_id")]
    pub stripe_unlimited_price_id: String,

    pub google_client_id: Option<String>,

    pub google_client_secret: Option<String>,

    pub apple_client_id: Option<String>,

    pub apple_client_secret: Option<String>,

    pub allowed_origins: Option<String>,
}

const DEFAULT_PORT: u16 = 8000;

fn default_environment() -> String {
    "development".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_access_token_minutes() -> i64 {
    30
}

fn default_refresh_token_days() -> i64 {
    7
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}

fn default_plus_price_id() -> String {
    "price_plus_monthly".to_string()
}

fn default_unlimited_price_id() -> String {
    "price_unlimited_monthly".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first when present. Field names map to upper
    /// case variables: `database_url` -> `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable (`DATABASE_URL`, `SECRET_KEY`)
    /// is missing or a value cannot be parsed into its field type.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    /// `SERVER_PORT`, else `PORT`, else 8000.
    pub fn listen_port(&self) -> u16 {
        self.server_port.or(self.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Extra CORS origins from `ALLOWED_ORIGINS`, trimmed, empties dropped.
    pub fn extra_origins(&self) -> Vec<String> {
        self.allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
impl Config {
    /// Production-mode configuration with no external providers configured.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/sunshine_test".to_string(),
            server_port: None,
            port: None,
            environment: "production".to_string(),
            secret_key: "test-secret-key".to_string(),
            jwt_algorithm: default_jwt_algorithm(),
            access_token_expire_minutes: default_access_token_minutes(),
            refresh_token_expire_days: default_refresh_token_days(),
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            openai_image_model: default_openai_image_model(),
            stripe_secret_key: None,
            stripe_publishable_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: default_stripe_api_base(),
            stripe_plus_price_id: default_plus_price_id(),
            stripe_unlimited_price_id: default_unlimited_price_id(),
            google_client_id: None,
            google_client_secret: None,
            apple_client_id: None,
            apple_client_secret: None,
            allowed_origins: None,
        }
    }
}
