//! JWT bearer authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the access token from the Authorization header
//! 2. Verify its signature, expiry and type
//! 3. Load the user it names and check the account is active
//! 4. Inject authentication context into the request

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::user::User,
    security::{self, ACCESS_TOKEN},
    state::AppState,
};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>` and scope every query
/// by `user_id`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
}

/// `Authorization: Bearer <token>` -> `<token>`.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AppError> {
    let header =
        header.ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))
}

/// JWT authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>`
/// 2. Decode the token; only `type == "access"` is accepted
/// 3. Load the user by the `sub` claim
/// 4. Inject `AuthContext` and call the next handler
///
/// # Errors
///
/// - 401 for a missing, malformed, expired or refresh token
/// - 404 when the user no longer exists
/// - 403 when the user is inactive
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(
        request
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok()),
    )?;

    let claims = security::decode_token_of_type(&state.config, token, ACCESS_TOKEN)?;
    let user_id = claims.user_id()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::UserNotFound)?;

    if !user.is_active {
        return Err(AppError::InactiveUser);
    }

    request.extensions_mut().insert(AuthContext {
        user_id: user.id,
        email: user.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert_eq!(bearer_token(Some("bearer abc.def")).unwrap(), "abc.def");

        assert!(matches!(bearer_token(None), Err(AppError::Unauthorized(_))));
        assert!(bearer_token(Some("Basic dXNlcg==")).is_err());
        assert!(bearer_token(Some("Bearer   ")).is_err());
    }
}
