//! JWT issuing/verification and password hashing.

use std::str::FromStr;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::Config, error::AppError};

pub const ACCESS_TOKEN: &str = "access";
pub const REFRESH_TOKEN: &str = "refresh";

/// Claims carried by both access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    /// `"access"` or `"refresh"`
    #[serde(rename = "type")]
    pub token_type: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::InvalidToken)
    }
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

fn algorithm(config: &Config) -> Result<Algorithm, AppError> {
    let alg = Algorithm::from_str(&config.jwt_algorithm)
        .map_err(|_| AppError::Internal(format!("unsupported JWT algorithm {}", config.jwt_algorithm)))?;
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(alg),
        other => Err(AppError::Internal(format!(
            "JWT algorithm {other:?} needs a key pair, only HMAC secrets are supported"
        ))),
    }
}

fn issue(
    config: &Config,
    user_id: Uuid,
    email: &str,
    token_type: &str,
    ttl: Duration,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
        token_type: token_type.to_string(),
    };

    encode(
        &Header::new(algorithm(config)?),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
}

pub fn create_access_token(config: &Config, user_id: Uuid, email: &str) -> Result<String, AppError> {
    issue(
        config,
        user_id,
        email,
        ACCESS_TOKEN,
        Duration::minutes(config.access_token_expire_minutes),
    )
}

pub fn create_refresh_token(config: &Config, user_id: Uuid, email: &str) -> Result<String, AppError> {
    issue(
        config,
        user_id,
        email,
        REFRESH_TOKEN,
        Duration::days(config.refresh_token_expire_days),
    )
}

/// Issue an access/refresh pair for a freshly authenticated user.
pub fn create_tokens(config: &Config, user_id: Uuid, email: &str) -> Result<TokenPair, AppError> {
    Ok(TokenPair {
        access_token: create_access_token(config, user_id, email)?,
        refresh_token: create_refresh_token(config, user_id, email)?,
        token_type: "bearer".to_string(),
    })
}

/// Verify signature and expiry. Any failure maps to `InvalidToken`.
pub fn decode_token(config: &Config, token: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(algorithm(config)?);
    validation.leeway = 0;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("Token rejected: {}", e);
        AppError::InvalidToken
    })
}

/// Decode and require a specific token type.
pub fn decode_token_of_type(config: &Config, token: &str, token_type: &str) -> Result<Claims, AppError> {
    let claims = decode_token(config, token)?;
    if claims.token_type != token_type {
        return Err(AppError::InvalidToken);
    }
    Ok(claims)
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Unparseable hashes count as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
