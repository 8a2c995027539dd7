//! Subscription and billing HTTP handlers.
//!
//! This module implements the `/api/v1/subscription` endpoints. Plans are
//! sold through Stripe Checkout; single stories through payment intents.

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::subscription::{
        CancelRequest, CheckoutRequest, CheckoutResponse, PaymentHistoryQuery,
        PaymentHistoryResponse, PaymentIntentRequest, PaymentIntentResponse, PlansResponse,
        PortalRequest, PortalResponse, SubscriptionResponse, UpdatePlanRequest, UsageResponse,
        UseCreditResponse, plan_catalogue,
    },
    services::{subscription_service, usage_service},
    state::AppState,
};

/// Public plan catalogue.
///
/// # Endpoint
///
/// `GET /api/v1/subscription/plans`
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "plans": {
///     "individual": { "name": "Individual", "type": "per_use", "price_per_story": 500, ... },
///     "plus": { "name": "Plus", "type": "subscription", "price_monthly": 1000, ... },
///     "unlimited": { "name": "Unlimited", "type": "subscription", "price_monthly": 3000, ... }
///   }
/// }
/// ```
pub async fn plans(State(state): State<AppState>) -> Json<PlansResponse> {
    Json(plan_catalogue(&state.config))
}

/// Current subscription, refreshed from Stripe when linked.
pub async fn current_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let response = subscription_service::current_subscription(&state, auth.user_id).await?;
    Ok(Json(response))
}

/// Start Stripe Checkout.
///
/// # Request Body
///
/// ```json
/// {
///   "plan": "plus",
///   "success_url": "https://mysunshinestory.ai/billing/success",
///   "cancel_url": "https://mysunshinestory.ai/billing"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: `{"checkout_url": "https://checkout.stripe.com/..."}`
/// - **Error (400)**: plan is not `plus` or `unlimited`, or a URL is invalid
/// - **Error (503)**: Stripe is not configured
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let response = subscription_service::create_checkout(&state, auth.user_id, request).await?;
    Ok(Json(response))
}

/// Payment intent for one story credit (500 cents).
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let response =
        subscription_service::create_payment_intent(&state, auth.user_id, request).await?;
    Ok(Json(response))
}

/// Switch plans with proration.
pub async fn update_plan(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpdatePlanRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let response = subscription_service::change_plan(&state, auth.user_id, &request.plan).await?;
    Ok(Json(response))
}

/// `{"immediate": true}` cancels now and drops to the free tier; otherwise
/// the plan runs to the end of the paid period.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let response = subscription_service::cancel(&state, auth.user_id, request.immediate).await?;
    Ok(Json(response))
}

pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let response = subscription_service::reactivate(&state, auth.user_id).await?;
    Ok(Json(response))
}

pub async fn customer_portal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PortalRequest>,
) -> Result<Json<PortalResponse>, AppError> {
    let response =
        subscription_service::portal_session(&state, auth.user_id, &request.return_url).await?;
    Ok(Json(response))
}

pub async fn usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UsageResponse>, AppError> {
    let subscription = usage_service::get_subscription(&state.pool, auth.user_id).await?;
    Ok(Json(usage_service::usage_summary(&subscription)))
}

/// Spend one purchased credit.
///
/// # Response
///
/// - **Error (402)**: "No story credits available"
pub async fn use_credit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UseCreditResponse>, AppError> {
    let credits_remaining = usage_service::use_credit(&state.pool, auth.user_id).await?;
    Ok(Json(UseCreditResponse {
        message: "Story credit used".to_string(),
        credits_remaining,
    }))
}

pub async fn payment_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<PaymentHistoryQuery>,
) -> Result<Json<PaymentHistoryResponse>, AppError> {
    let response =
        subscription_service::payment_history(&state, auth.user_id, query.limit).await?;
    Ok(Json(response))
}
