//! Stripe webhook receiver.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;

use crate::{
    error::AppError,
    models::webhook::WebhookAck,
    services::webhook_service,
    state::AppState,
};

/// Receive a Stripe event.
///
/// # Endpoint
///
/// `POST /api/v1/subscription/webhook` (public, authenticated by signature)
///
/// # Response
///
/// - **Success (200 OK)**: `{"status": "success"}`, also when applying the
///   event failed locally (the error is logged and echoed in `error`)
/// - **Error (400)**: missing or invalid `Stripe-Signature`
/// - **Error (500)**: no webhook secret configured
///
/// # Security
///
/// - The raw body is verified before it is parsed
/// - Signatures older than 5 minutes are rejected
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| AppError::Internal("Webhook secret not configured".to_string()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidRequest("Missing Stripe-Signature header".to_string()))?;

    let event =
        webhook_service::verify_webhook_signature(&body, signature, secret, Utc::now().timestamp())?;
    let event_id = event.id.clone();

    match webhook_service::handle_event(&state.pool, &state.config, event).await {
        Ok(()) => Ok(Json(WebhookAck::success())),
        Err(e) => {
            tracing::error!("Failed to process Stripe event {}: {}", event_id, e);
            Ok(Json(WebhookAck::failed(e.to_string())))
        }
    }
}
