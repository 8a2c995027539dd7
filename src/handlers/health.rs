//! Public utility endpoints: API info, health checks, CORS smoke test and
//! the route catalogue.

use axum::{Json, extract::State, http::HeaderMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{error::AppError, middleware::cors::CorsPolicy, state::AppState};

/// Health check response.
///
/// Returns service status and database connectivity.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// API information.
///
/// # Endpoint
///
/// `GET /`
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Sunshine Stories Backend API",
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "documentation": "/docs",
        "endpoints": {
            "health": "/api/v1/health",
            "auth": "/api/v1/auth",
            "sunshines": "/api/v1/sunshines",
            "stories": "/api/v1/stories",
            "subscription": "/api/v1/subscription"
        }
    }))
}

/// Health check handler.
///
/// # Checks
///
/// - Database connectivity (executes simple query)
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// # Response (500 Internal Server Error)
///
/// If database is unreachable, returns standard error response.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
pub struct CorsTestResponse {
    pub message: String,
    pub origin: Option<String>,
    pub allowed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Echo the caller's `Origin` and whether the CORS policy admits it.
///
/// # Endpoint
///
/// `GET /api/v1/cors-test`
///
/// Deployment smoke check: a browser on the frontend calls this and
/// should see both a 200 and `Access-Control-Allow-Origin`.
pub async fn cors_test(State(state): State<AppState>, headers: HeaderMap) -> Json<CorsTestResponse> {
    let origin = headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let allowed = origin
        .as_deref()
        .is_some_and(|origin| CorsPolicy::from_config(&state.config).should_allow_origin(origin));

    Json(CorsTestResponse {
        message: "CORS is working".to_string(),
        origin,
        allowed,
        timestamp: Utc::now(),
    })
}

/// Route catalogue.
///
/// # Endpoint
///
/// `GET /docs`
pub async fn docs() -> Json<Value> {
    Json(json!({
        "title": "Sunshine Stories API",
        "version": env!("CARGO_PKG_VERSION"),
        "authentication": "Authorization: Bearer <access_token>",
        "routes": {
            "public": [
                "GET /",
                "GET /health",
                "GET /api/v1/health",
                "GET /api/v1/cors-test",
                "GET /docs",
                "POST /api/v1/auth/register",
                "POST /api/v1/auth/login",
                "POST /api/v1/auth/oauth/login",
                "POST /api/v1/auth/oauth/exchange",
                "POST /api/v1/auth/refresh",
                "GET /api/v1/stories/example",
                "GET /api/v1/subscription/plans",
                "POST /api/v1/subscription/webhook"
            ],
            "auth": [
                "GET /api/v1/auth/me",
                "POST /api/v1/auth/logout",
                "DELETE /api/v1/auth/account"
            ],
            "sunshines": [
                "POST /api/v1/sunshines",
                "GET /api/v1/sunshines?include_inactive=false",
                "GET /api/v1/sunshines/{id}",
                "PUT /api/v1/sunshines/{id}",
                "DELETE /api/v1/sunshines/{id}?permanent=false",
                "GET /api/v1/sunshines/{id}/character-reference",
                "POST /api/v1/sunshines/{id}/family",
                "PUT /api/v1/sunshines/family/{member_id}",
                "DELETE /api/v1/sunshines/family/{member_id}",
                "POST /api/v1/sunshines/{id}/comfort-items",
                "PUT /api/v1/sunshines/comfort-items/{item_id}",
                "DELETE /api/v1/sunshines/comfort-items/{item_id}",
                "POST /api/v1/sunshines/{id}/personality-traits",
                "DELETE /api/v1/sunshines/personality-traits/{trait_id}"
            ],
            "stories": [
                "POST /api/v1/stories/generate",
                "GET /api/v1/stories/history?limit=10&offset=0",
                "GET /api/v1/stories/{id}",
                "PUT /api/v1/stories/{id}/favorite",
                "POST /api/v1/stories/{id}/rate",
                "DELETE /api/v1/stories/{id}"
            ],
            "subscription": [
                "GET /api/v1/subscription/current",
                "POST /api/v1/subscription/checkout",
                "POST /api/v1/subscription/payment-intent",
                "PUT /api/v1/subscription/update",
                "POST /api/v1/subscription/cancel",
                "POST /api/v1/subscription/reactivate",
                "POST /api/v1/subscription/portal",
                "GET /api/v1/subscription/usage",
                "POST /api/v1/subscription/use-credit",
                "GET /api/v1/subscription/history?limit=10"
            ]
        }
    }))
}
