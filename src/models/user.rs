//! User data models and authentication request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{subscription::SubscriptionResponse, sunshine::SunshineSummary};

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table. A user signs in either with a password
/// (`hashed_password` set) or through Google/Apple (`google_id` /
/// `apple_id` set), or both once an OAuth identity is linked to an
/// existing email account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub full_name: Option<String>,

    /// NULL for OAuth-only accounts
    pub hashed_password: Option<String>,

    pub google_id: Option<String>,
    pub apple_id: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Request to register with email and password.
///
/// # JSON Example
///
/// ```json
/// {
///   "email": "parent@example.com",
///   "password": "a-long-password",
///   "full_name": "Alex Parent"
/// }
/// ```
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: String,
}

/// Sign in with an ID token already obtained by the client.
#[derive(Debug, Deserialize)]
pub struct OAuthLoginRequest {
    pub token: String,
    /// `"google"` or `"apple"`
    pub provider: String,
}

/// Exchange an authorization code obtained by the client redirect flow.
#[derive(Debug, Deserialize)]
pub struct OAuthExchangeRequest {
    pub code: String,
    pub provider: String,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Public view of a user (no password hash, no provider ids).
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            is_active: user.is_active,
            is_verified: user.is_verified,
            is_admin: user.is_admin,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login: user.last_login,
        }
    }
}

/// Returned by register, login and both OAuth flows.
///
/// # JSON Example
///
/// ```json
/// {
///   "access_token": "eyJhbGciOiJIUzI1NiJ9...",
///   "refresh_token": "eyJhbGciOiJIUzI1NiJ9...",
///   "token_type": "bearer",
///   "user": { "id": "...", "email": "parent@example.com", ... }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
}

/// `GET /auth/me`: the user plus their subscription and child profiles.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub subscription: Option<SubscriptionResponse>,
    pub sunshines: Vec<SunshineSummary>,
}

/// Verified identity extracted from a provider ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthProfile {
    pub provider_user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}
