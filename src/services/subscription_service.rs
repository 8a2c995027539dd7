//! Subscription service - Stripe-backed billing for the current user.
//!
//! Stripe is the source of truth for paid subscriptions. Local rows are
//! updated right after a successful Stripe call and again by webhooks, so
//! a missed webhook is corrected the next time the subscription is read.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        subscription::{
            CheckoutRequest, CheckoutResponse, INDIVIDUAL_STORY_PRICE_CENTS, PaidPlan,
            PaymentHistoryResponse, PaymentIntentRequest, PaymentIntentResponse, PaymentRecord,
            PortalResponse, Subscription, SubscriptionResponse, SubscriptionTier,
            tier_for_price_id,
        },
        webhook::StripeSubscription,
    },
    services::{stripe_client::StripeClient, usage_service, user_service},
    state::AppState,
};

/// Validate a URL Stripe will redirect the browser to.
///
/// # Rules
///
/// - Must be a valid absolute URL
/// - Must be HTTPS (HTTP allowed for localhost during development)
/// - Maximum 2048 characters
pub fn validate_redirect_url(url: &str) -> Result<(), AppError> {
    if url.len() > 2048 {
        return Err(AppError::InvalidRequest(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| AppError::InvalidRequest(format!("Invalid URL format: {url}")))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            if matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "0.0.0.0")) {
                Ok(())
            } else {
                Err(AppError::InvalidRequest(
                    "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
                ))
            }
        }
        _ => Err(AppError::InvalidRequest(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

/// Overwrite tier, limits and feature flags; the monthly counter is kept.
pub async fn apply_tier(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    tier: SubscriptionTier,
    price_id: Option<&str>,
) -> Result<Subscription, AppError> {
    let features = tier.features();
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET tier = $2,
            stripe_price_id = $3,
            stories_per_month = $4,
            sunshines_limit = $5,
            has_pdf_export = $6,
            has_image_generation = $7,
            has_custom_illustrations = $8,
            has_multi_language = $9,
            has_api_access = $10,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(subscription_id)
    .bind(tier.as_str())
    .bind(price_id)
    .bind(features.stories_per_month)
    .bind(features.sunshines_limit)
    .bind(features.has_pdf_export)
    .bind(features.has_image_generation)
    .bind(features.has_custom_illustrations)
    .bind(features.has_multi_language)
    .bind(features.has_api_access)
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::SubscriptionNotFound)?;

    Ok(subscription)
}

/// Copy status, cancellation flag and period bounds from Stripe.
///
/// A period start later than the stored one is a renewal and zeroes the
/// monthly story counter.
pub async fn sync_from_stripe(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    remote: &StripeSubscription,
) -> Result<Subscription, AppError> {
    let (period_start, period_end) = remote.period();
    let cancelled_at = remote.canceled_at.and_then(crate::models::webhook::timestamp);

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET status = $2,
            stories_created_this_month = CASE
                WHEN current_period_start IS NOT NULL AND $5 > current_period_start THEN 0
                ELSE stories_created_this_month
            END,
            cancel_at_period_end = $3,
            cancelled_at = COALESCE($4, cancelled_at),
            current_period_start = COALESCE($5, current_period_start),
            current_period_end = COALESCE($6, current_period_end),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(subscription_id)
    .bind(&remote.status)
    .bind(remote.cancel_at_period_end)
    .bind(cancelled_at)
    .bind(period_start)
    .bind(period_end)
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::SubscriptionNotFound)?;

    Ok(subscription)
}

/// Current subscription, refreshed from Stripe when one is linked.
///
/// A failed refresh is logged and the stored row is returned.
pub async fn current_subscription(state: &AppState, user_id: Uuid) -> Result<SubscriptionResponse, AppError> {
    let mut subscription = usage_service::get_subscription(&state.pool, user_id).await?;

    if let (Some(stripe_id), Some(stripe)) = (
        subscription.stripe_subscription_id.clone(),
        StripeClient::from_config(&state.http, &state.config),
    ) {
        match refresh(&state.pool, &stripe, subscription.id, &stripe_id).await {
            Ok(refreshed) => subscription = refreshed,
            Err(e) => tracing::warn!(
                "Could not refresh subscription {} from Stripe: {}",
                subscription.id,
                e
            ),
        }
    }

    let can_create_story = usage_service::can_generate_story(&subscription).is_allowed();
    Ok(SubscriptionResponse::new(subscription, can_create_story))
}

async fn refresh(
    pool: &DbPool,
    stripe: &StripeClient,
    subscription_id: Uuid,
    stripe_subscription_id: &str,
) -> Result<Subscription, AppError> {
    let remote = stripe.retrieve_subscription(stripe_subscription_id).await?;
    let mut conn = pool.acquire().await?;
    sync_from_stripe(&mut conn, subscription_id, &remote).await
}

/// Stripe customer id for the user, created and stored on first use.
async fn ensure_customer(
    state: &AppState,
    stripe: &StripeClient,
    subscription: &Subscription,
) -> Result<String, AppError> {
    if let Some(customer_id) = &subscription.stripe_customer_id {
        return Ok(customer_id.clone());
    }

    let user = user_service::get_user(&state.pool, subscription.user_id).await?;
    let customer = stripe
        .create_customer(&user.email, user.full_name.as_deref(), &user.id.to_string())
        .await?;

    sqlx::query(
        "UPDATE subscriptions SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(subscription.id)
    .bind(&customer.id)
    .execute(&state.pool)
    .await?;

    tracing::info!("Created Stripe customer {} for user {}", customer.id, user.id);
    Ok(customer.id)
}

/// Start a Stripe Checkout session for the `plus` or `unlimited` plan.
pub async fn create_checkout(
    state: &AppState,
    user_id: Uuid,
    request: CheckoutRequest,
) -> Result<CheckoutResponse, AppError> {
    let plan = PaidPlan::parse(&request.plan)
        .ok_or_else(|| AppError::InvalidRequest("Invalid subscription plan".to_string()))?;
    validate_redirect_url(&request.success_url)?;
    validate_redirect_url(&request.cancel_url)?;

    let stripe = StripeClient::require(&state.http, &state.config)?;
    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let customer_id = ensure_customer(state, &stripe, &subscription).await?;

    let session = stripe
        .create_checkout_session(
            &customer_id,
            plan.price_id(&state.config),
            &request.success_url,
            &request.cancel_url,
            &user_id.to_string(),
        )
        .await?;

    let checkout_url = session.url.ok_or_else(|| {
        AppError::Upstream(format!("Checkout session {} has no URL", session.id))
    })?;

    Ok(CheckoutResponse { checkout_url })
}

/// Payment intent for one story credit.
pub async fn create_payment_intent(
    state: &AppState,
    user_id: Uuid,
    request: PaymentIntentRequest,
) -> Result<PaymentIntentResponse, AppError> {
    let stripe = StripeClient::require(&state.http, &state.config)?;
    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let customer_id = ensure_customer(state, &stripe, &subscription).await?;

    let intent = stripe
        .create_payment_intent(
            &customer_id,
            INDIVIDUAL_STORY_PRICE_CENTS,
            &request.description,
            &user_id.to_string(),
        )
        .await?;

    let client_secret = intent.client_secret.ok_or_else(|| {
        AppError::Upstream(format!("Payment intent {} has no client secret", intent.id))
    })?;

    Ok(PaymentIntentResponse {
        client_secret,
        payment_intent_id: intent.id,
        amount: INDIVIDUAL_STORY_PRICE_CENTS,
    })
}

/// Move an existing Stripe subscription to another plan with proration.
pub async fn change_plan(state: &AppState, user_id: Uuid, plan: &str) -> Result<SubscriptionResponse, AppError> {
    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let stripe_id = subscription
        .stripe_subscription_id
        .clone()
        .ok_or_else(|| AppError::InvalidRequest("No active subscription to update".to_string()))?;
    let plan = PaidPlan::parse(plan)
        .ok_or_else(|| AppError::InvalidRequest("Invalid plan".to_string()))?;

    let stripe = StripeClient::require(&state.http, &state.config)?;
    let remote = stripe.retrieve_subscription(&stripe_id).await?;
    let price_id = plan.price_id(&state.config);
    let remote = stripe.change_subscription_price(&remote, price_id).await?;

    let mut tx = state.pool.begin().await?;
    let tier = tier_for_price_id(&state.config, price_id);
    apply_tier(&mut tx, subscription.id, tier, Some(price_id)).await?;
    let subscription = sync_from_stripe(&mut tx, subscription.id, &remote).await?;
    tx.commit().await?;

    tracing::info!("Subscription {} moved to {} tier", subscription.id, tier);

    let can_create_story = usage_service::can_generate_story(&subscription).is_allowed();
    Ok(SubscriptionResponse::new(subscription, can_create_story))
}

/// Cancel now, or at the end of the current billing period.
pub async fn cancel(state: &AppState, user_id: Uuid, immediate: bool) -> Result<SubscriptionResponse, AppError> {
    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let stripe_id = subscription
        .stripe_subscription_id
        .clone()
        .ok_or_else(|| AppError::InvalidRequest("No active subscription to cancel".to_string()))?;
    let stripe = StripeClient::require(&state.http, &state.config)?;

    let subscription = if immediate {
        stripe.cancel_subscription_now(&stripe_id).await?;

        let mut tx = state.pool.begin().await?;
        apply_tier(&mut tx, subscription.id, SubscriptionTier::Free, None).await?;
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled',
                stripe_subscription_id = NULL,
                cancel_at_period_end = FALSE,
                cancelled_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(subscription.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        subscription
    } else {
        let remote = stripe.set_cancel_at_period_end(&stripe_id, true).await?;
        let mut conn = state.pool.acquire().await?;
        sync_from_stripe(&mut conn, subscription.id, &remote).await?
    };

    tracing::info!(
        "Subscription {} cancelled (immediate: {})",
        subscription.id,
        immediate
    );

    let can_create_story = usage_service::can_generate_story(&subscription).is_allowed();
    Ok(SubscriptionResponse::new(subscription, can_create_story))
}

/// Undo a pending cancel-at-period-end.
pub async fn reactivate(state: &AppState, user_id: Uuid) -> Result<SubscriptionResponse, AppError> {
    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let stripe_id = match (&subscription.stripe_subscription_id, subscription.cancel_at_period_end) {
        (Some(id), true) => id.clone(),
        _ => {
            return Err(AppError::InvalidRequest(
                "No cancelled subscription to reactivate".to_string(),
            ));
        }
    };

    let stripe = StripeClient::require(&state.http, &state.config)?;
    let remote = stripe.set_cancel_at_period_end(&stripe_id, false).await?;
    let mut conn = state.pool.acquire().await?;
    let subscription = sync_from_stripe(&mut conn, subscription.id, &remote).await?;

    let can_create_story = usage_service::can_generate_story(&subscription).is_allowed();
    Ok(SubscriptionResponse::new(subscription, can_create_story))
}

/// Stripe customer portal link.
pub async fn portal_session(state: &AppState, user_id: Uuid, return_url: &str) -> Result<PortalResponse, AppError> {
    validate_redirect_url(return_url)?;

    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let customer_id = subscription
        .stripe_customer_id
        .ok_or_else(|| AppError::InvalidRequest("No billing account found".to_string()))?;

    let stripe = StripeClient::require(&state.http, &state.config)?;
    let session = stripe.create_portal_session(&customer_id, return_url).await?;

    Ok(PortalResponse {
        portal_url: session.url,
    })
}

/// Succeeded payments for the user's Stripe customer, newest first.
pub async fn payment_history(state: &AppState, user_id: Uuid, limit: i64) -> Result<PaymentHistoryResponse, AppError> {
    let subscription = usage_service::get_subscription(&state.pool, user_id).await?;
    let Some(customer_id) = subscription.stripe_customer_id else {
        return Ok(PaymentHistoryResponse { payments: Vec::new() });
    };

    let stripe = StripeClient::require(&state.http, &state.config)?;
    let payments = stripe
        .list_payment_intents(&customer_id, limit)
        .await?
        .into_iter()
        .filter(|intent| intent.status == "succeeded")
        .map(|intent| PaymentRecord {
            id: intent.id,
            amount: intent.amount,
            currency: intent.currency,
            description: intent.description,
            created: intent.created,
            status: intent.status,
        })
        .collect();

    Ok(PaymentHistoryResponse { payments })
}
