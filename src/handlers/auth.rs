//! Authentication HTTP handlers.
//!
//! This module implements the `/api/v1/auth` endpoints:
//! - POST /register, /login - email and password
//! - POST /oauth/login, /oauth/exchange - Google and Apple sign-in
//! - POST /refresh - new access token from a refresh token
//! - GET /me, POST /logout, DELETE /account - authenticated user

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::user::{
        LoginRequest, LoginResponse, MeResponse, OAuthExchangeRequest, OAuthLoginRequest,
        RefreshRequest, RefreshResponse, RegisterRequest,
    },
    services::{oauth_service, oauth_service::OAuthProvider, user_service},
    state::AppState,
    validation::validate_request,
};

/// Register a new user.
///
/// # Endpoint
///
/// `POST /api/v1/auth/register`
///
/// # Request Body
///
/// ```json
/// {
///   "email": "parent@example.com",
///   "password": "a-long-password",
///   "full_name": "Alex Parent"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: tokens and the new user
/// - **Error (400)**: email already registered, malformed email, or a
///   password shorter than 8 characters
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_request(&request)?;

    let response = user_service::register(&state.pool, &state.config, request).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Sign in with email and password.
///
/// # Response
///
/// - **Success (200 OK)**: tokens and the user
/// - **Error (401)**: "Invalid email or password"
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = user_service::authenticate(&state.pool, &state.config, request).await?;
    Ok(Json(response))
}

/// Sign in with an ID token the client already holds.
///
/// # Request Body
///
/// ```json
/// { "token": "<provider id_token>", "provider": "google" }
/// ```
///
/// # Response
///
/// - **Error (400)**: unknown provider
/// - **Error (401)**: token failed verification
/// - **Error (503)**: provider not configured
pub async fn oauth_login(
    State(state): State<AppState>,
    Json(request): Json<OAuthLoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let provider: OAuthProvider = request.provider.parse()?;

    let profile =
        oauth_service::verify_id_token(&state.http, &state.config, provider, &request.token).await?;
    let response = user_service::oauth_login(&state.pool, &state.config, provider, &profile).await?;

    Ok(Json(response))
}

/// Exchange an authorization code from the redirect flow.
///
/// # Endpoint
///
/// `POST /api/v1/auth/oauth/exchange`
///
/// # Request Body
///
/// ```json
/// {
///   "code": "4/0AX4XfWh...",
///   "provider": "google",
///   "redirect_uri": "https://mysunshinestory.ai/auth/callback"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: tokens and the user
/// - **Error (400)**: unknown provider
/// - **Error (401)**: the provider returned no valid ID token
/// - **Error (503)**: provider not configured or its token endpoint failed
pub async fn oauth_exchange(
    State(state): State<AppState>,
    Json(request): Json<OAuthExchangeRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let provider: OAuthProvider = request.provider.parse()?;
    tracing::info!(
        "OAuth exchange request: provider={}, redirect_uri={}",
        provider.as_str(),
        request.redirect_uri
    );

    let profile = oauth_service::exchange_code(
        &state.http,
        &state.config,
        provider,
        &request.code,
        &request.redirect_uri,
    )
    .await?;
    let response = user_service::oauth_login(&state.pool, &state.config, provider, &profile).await?;

    Ok(Json(response))
}

/// Issue a new access token.
///
/// Only refresh tokens are accepted here; an access token gets 401.
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let response = user_service::refresh(&state.pool, &state.config, &request.refresh_token).await?;
    Ok(Json(response))
}

/// Current user with subscription and profile summaries.
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MeResponse>, AppError> {
    let response = user_service::me(&state.pool, auth.user_id).await?;
    Ok(Json(response))
}

/// Tokens are stateless; the client discards them.
pub async fn logout(Extension(auth): Extension<AuthContext>) -> StatusCode {
    tracing::info!("User {} logged out", auth.user_id);
    StatusCode::NO_CONTENT
}

/// Delete the account and everything it owns.
///
/// # Response
///
/// - **Success (204 No Content)**
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    user_service::delete_account(&state.pool, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
