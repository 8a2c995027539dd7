//! Google and Apple sign-in.
//!
//! ID tokens are RS256 JWTs signed with keys the provider publishes as a
//! JWKS. The key is chosen by the token header's `kid`; audience must be
//! our client id and issuer the provider.

use std::{fmt, str::FromStr, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{config::Config, error::AppError, models::user::OAuthProfile};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        }
    }

    /// Column of `users` holding the provider's subject id.
    pub fn id_column(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google_id",
            OAuthProvider::Apple => "apple_id",
        }
    }

    fn jwks_url(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "https://www.googleapis.com/oauth2/v3/certs",
            OAuthProvider::Apple => "https://appleid.apple.com/auth/keys",
        }
    }

    fn token_url(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "https://oauth2.googleapis.com/token",
            OAuthProvider::Apple => "https://appleid.apple.com/auth/token",
        }
    }

    fn issuers(&self) -> &'static [&'static str] {
        match self {
            OAuthProvider::Google => &["accounts.google.com", "https://accounts.google.com"],
            OAuthProvider::Apple => &["https://appleid.apple.com"],
        }
    }

    fn client_id<'a>(&self, config: &'a Config) -> Option<&'a str> {
        let id = match self {
            OAuthProvider::Google => config.google_client_id.as_deref(),
            OAuthProvider::Apple => config.apple_client_id.as_deref(),
        };
        id.map(str::trim).filter(|id| !id.is_empty())
    }

    fn client_secret<'a>(&self, config: &'a Config) -> Option<&'a str> {
        let secret = match self {
            OAuthProvider::Google => config.google_client_secret.as_deref(),
            OAuthProvider::Apple => config.apple_client_secret.as_deref(),
        };
        secret.map(str::trim).filter(|secret| !secret.is_empty())
    }

    fn not_configured(&self) -> AppError {
        AppError::ServiceUnavailable(format!("{self} sign-in is not configured"))
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthProvider::Google => f.write_str("Google"),
            OAuthProvider::Apple => f.write_str("Apple"),
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "apple" => Ok(OAuthProvider::Apple),
            _ => Err(AppError::InvalidRequest("Invalid OAuth provider".to_string())),
        }
    }
}

/// Claims we read from a provider ID token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    /// Google sends a bool, Apple a `"true"`/`"false"` string
    #[serde(default)]
    email_verified: Option<Value>,
    name: Option<Value>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

fn display_name(name: Option<&Value>) -> Option<String> {
    let name = match name? {
        Value::String(name) => name.trim().to_string(),
        // Apple: {"firstName": "...", "lastName": "..."}
        Value::Object(parts) => {
            let part = |key: &str| parts.get(key).and_then(Value::as_str).unwrap_or_default();
            format!("{} {}", part("firstName"), part("lastName"))
                .trim()
                .to_string()
        }
        _ => return None,
    };
    (!name.is_empty()).then_some(name)
}

fn is_verified(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(verified)) => *verified,
        Some(Value::String(verified)) => verified.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn profile_from_claims(claims: IdTokenClaims) -> Result<OAuthProfile, AppError> {
    let email = claims
        .email
        .filter(|email| !email.trim().is_empty())
        .ok_or_else(|| AppError::Unauthorized("OAuth token has no email".to_string()))?;

    Ok(OAuthProfile {
        provider_user_id: claims.sub,
        email: email.trim().to_ascii_lowercase(),
        full_name: display_name(claims.name.as_ref()),
        avatar_url: claims.picture,
        email_verified: is_verified(claims.email_verified.as_ref()),
    })
}

async fn fetch_jwks(http: &Client, provider: OAuthProvider) -> Result<JwkSet, AppError> {
    let resp = http
        .get(provider.jwks_url())
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("{provider} key fetch failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(AppError::Upstream(format!(
            "{provider} key fetch returned {}",
            resp.status()
        )));
    }

    resp.json::<JwkSet>()
        .await
        .map_err(|e| AppError::Upstream(format!("{provider} key set unreadable: {e}")))
}

/// Verify a provider ID token and extract the signed-in identity.
///
/// # Errors
///
/// - `ServiceUnavailable`: no client id configured for the provider
/// - `Unauthorized`: bad signature, audience, issuer, expiry or unknown key
/// - `Upstream`: the provider's key set could not be fetched
pub async fn verify_id_token(
    http: &Client,
    config: &Config,
    provider: OAuthProvider,
    token: &str,
) -> Result<OAuthProfile, AppError> {
    let client_id = provider
        .client_id(config)
        .ok_or_else(|| provider.not_configured())?;

    let invalid = |reason: String| {
        tracing::warn!("{} token verification failed: {}", provider, reason);
        AppError::Unauthorized("Invalid OAuth token".to_string())
    };

    let header = decode_header(token).map_err(|e| invalid(e.to_string()))?;
    let kid = header
        .kid
        .ok_or_else(|| invalid("token header has no kid".to_string()))?;

    let jwks = fetch_jwks(http, provider).await?;
    let jwk = jwks
        .find(&kid)
        .ok_or_else(|| invalid(format!("no published key with kid {kid}")))?;
    let key = DecodingKey::from_jwk(jwk).map_err(|e| invalid(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[client_id]);
    validation.set_issuer(provider.issuers());

    let claims = decode::<IdTokenClaims>(token, &key, &validation)
        .map_err(|e| invalid(e.to_string()))?
        .claims;

    profile_from_claims(claims)
}

/// Trade an authorization code for tokens and verify the returned ID token.
///
/// # Errors
///
/// - `ServiceUnavailable`: provider not configured, or the token endpoint
///   failed ("OAuth service temporarily unavailable. Please try again.")
/// - `Unauthorized`: the returned ID token is missing or invalid
pub async fn exchange_code(
    http: &Client,
    config: &Config,
    provider: OAuthProvider,
    code: &str,
    redirect_uri: &str,
) -> Result<OAuthProfile, AppError> {
    let (Some(client_id), Some(client_secret)) =
        (provider.client_id(config), provider.client_secret(config))
    else {
        tracing::warn!("{} OAuth credentials are not configured", provider);
        return Err(provider.not_configured());
    };

    let unavailable = || {
        AppError::ServiceUnavailable(
            "OAuth service temporarily unavailable. Please try again.".to_string(),
        )
    };

    let form = [
        ("code", code),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("redirect_uri", redirect_uri),
        ("grant_type", "authorization_code"),
    ];

    let resp = http
        .post(provider.token_url())
        .timeout(REQUEST_TIMEOUT)
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            tracing::error!("{} code exchange failed: {}", provider, e);
            unavailable()
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::error!("{} code exchange returned {}: {}", provider, status, body);
        return Err(unavailable());
    }

    let tokens: TokenResponse = resp.json().await.map_err(|e| {
        tracing::error!("{} token response unreadable: {}", provider, e);
        unavailable()
    })?;

    let id_token = tokens
        .id_token
        .ok_or_else(|| AppError::Unauthorized("OAuth authentication failed".to_string()))?;

    verify_id_token(http, config, provider, &id_token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("Google".parse::<OAuthProvider>().unwrap(), OAuthProvider::Google);
        assert_eq!(" apple ".parse::<OAuthProvider>().unwrap(), OAuthProvider::Apple);
        assert!(matches!(
            "github".parse::<OAuthProvider>(),
            Err(AppError::InvalidRequest(_))
        ));
        assert_eq!(OAuthProvider::Apple.id_column(), "apple_id");
    }

    #[test]
    fn apple_name_object_and_string_verification() {
        let claims: IdTokenClaims = serde_json::from_value(json!({
            "sub": "001234.abc",
            "email": "Parent@Example.com",
            "email_verified": "true",
            "name": {"firstName": "Alex", "lastName": "Parent"}
        }))
        .unwrap();

        let profile = profile_from_claims(claims).unwrap();
        assert_eq!(profile.email, "parent@example.com");
        assert_eq!(profile.full_name.as_deref(), Some("Alex Parent"));
        assert!(profile.email_verified);
        assert_eq!(profile.avatar_url, None);
    }

    #[test]
    fn google_claims_map_to_profile() {
        let claims: IdTokenClaims = serde_json::from_value(json!({
            "sub": "1089",
            "email": "kid.parent@gmail.com",
            "email_verified": false,
            "name": "Sam Lee",
            "picture": "https://lh3.googleusercontent.com/a/photo"
        }))
        .unwrap();

        let profile = profile_from_claims(claims).unwrap();
        assert_eq!(profile.provider_user_id, "1089");
        assert_eq!(profile.full_name.as_deref(), Some("Sam Lee"));
        assert!(!profile.email_verified);
    }

    #[test]
    fn token_without_email_is_rejected() {
        let claims: IdTokenClaims = serde_json::from_value(json!({"sub": "1"})).unwrap();
        assert!(matches!(
            profile_from_claims(claims),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_unavailable() {
        let http = Client::new();
        let config = Config::for_tests();

        let result = verify_id_token(&http, &config, OAuthProvider::Google, "a.b.c").await;
        assert!(matches!(result, Err(AppError::ServiceUnavailable(_))));

        let result =
            exchange_code(&http, &config, OAuthProvider::Apple, "code", "https://app/cb").await;
        assert!(matches!(result, Err(AppError::ServiceUnavailable(_))));
    }
}
