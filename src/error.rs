//! Error types and HTTP error response handling.
//!
//! Every handler returns `Result<_, AppError>`; this module decides the
//! status code and JSON body each error turns into.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Missing, invalid or expired tokens; inactive users
/// - **Resource Errors**: Requested resources not found or not owned by the caller
/// - **Billing Errors**: Quota exhausted or missing payment setup
/// - **Upstream Errors**: OpenAI, Stripe or OAuth provider failures
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Returns HTTP 500 with details hidden from the client.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credentials are missing or do not match.
    ///
    /// Returns HTTP 401 with a `WWW-Authenticate: Bearer` challenge.
    #[error("{0}")]
    Unauthorized(String),

    /// Bearer token failed signature, expiry or type checks.
    #[error("Invalid authentication credentials")]
    InvalidToken,

    /// Token is valid but the account has been deactivated.
    #[error("Inactive user")]
    InactiveUser,

    #[error("User not found")]
    UserNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    /// Returned for profiles that do not exist OR belong to another user.
    #[error("Sunshine profile not found")]
    SunshineNotFound,

    #[error("Family member not found")]
    FamilyMemberNotFound,

    #[error("Comfort item not found")]
    ComfortItemNotFound,

    #[error("Personality trait not found")]
    PersonalityTraitNotFound,

    #[error("Story not found")]
    StoryNotFound,

    /// The request clashes with an existing account (e.g. an unverified
    /// OAuth email that belongs to another user).
    #[error("{0}")]
    Conflict(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Usage limit reached or feature not in the caller's plan.
    ///
    /// Returns HTTP 402 Payment Required.
    #[error("{0}")]
    PaymentRequired(String),

    /// A hosted dependency answered with an error.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// A hosted dependency is not configured or unreachable.
    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `Unauthorized`, `InvalidToken` → 401 Unauthorized
/// - `InactiveUser` → 403 Forbidden
/// - `*NotFound` → 404 Not Found
/// - `Conflict` → 409 Conflict
/// - `InvalidRequest` → 400 Bad Request
/// - `PaymentRequired` → 402 Payment Required
/// - `Upstream` → 502 Bad Gateway
/// - `ServiceUnavailable` → 503 Service Unavailable
/// - `Database`, `Internal` → 500 Internal Server Error (details hidden)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized(ref msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone())
            }
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", self.to_string()),
            AppError::InactiveUser => (StatusCode::FORBIDDEN, "inactive_user", self.to_string()),
            AppError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found", self.to_string()),
            AppError::SubscriptionNotFound => (
                StatusCode::NOT_FOUND,
                "subscription_not_found",
                self.to_string(),
            ),
            AppError::SunshineNotFound => (
                StatusCode::NOT_FOUND,
                "sunshine_not_found",
                self.to_string(),
            ),
            AppError::FamilyMemberNotFound => (
                StatusCode::NOT_FOUND,
                "family_member_not_found",
                self.to_string(),
            ),
            AppError::ComfortItemNotFound => (
                StatusCode::NOT_FOUND,
                "comfort_item_not_found",
                self.to_string(),
            ),
            AppError::PersonalityTraitNotFound => (
                StatusCode::NOT_FOUND,
                "personality_trait_not_found",
                self.to_string(),
            ),
            AppError::StoryNotFound => (StatusCode::NOT_FOUND, "story_not_found", self.to_string()),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::PaymentRequired(ref msg) => {
                (StatusCode::PAYMENT_REQUIRED, "payment_required", msg.clone())
            }
            AppError::Upstream(ref msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "An upstream service failed to process the request".to_string(),
                )
            }
            AppError::ServiceUnavailable(ref msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_carries_bearer_challenge() {
        let response = AppError::InvalidToken.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (AppError::InactiveUser, StatusCode::FORBIDDEN),
            (AppError::StoryNotFound, StatusCode::NOT_FOUND),
            (AppError::Conflict("taken".into()), StatusCode::CONFLICT),
            (AppError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::PaymentRequired("limit".into()), StatusCode::PAYMENT_REQUIRED),
            (AppError::Upstream("stripe".into()), StatusCode::BAD_GATEWAY),
            (
                AppError::ServiceUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn not_found_hides_nothing_but_resource_name() {
        assert_eq!(AppError::SunshineNotFound.to_string(), "Sunshine profile not found");
    }
}
