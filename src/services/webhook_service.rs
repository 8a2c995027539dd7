//! Webhook service for verifying and applying Stripe events.
//!
//! This module checks the `Stripe-Signature` header and brings the local
//! `subscriptions` row in line with the event.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::{
        subscription::{Subscription, SubscriptionTier, tier_for_price_id},
        webhook::{
            StripeEvent, StripeEventKind, StripeInvoice, StripePaymentIntent, StripeSubscription,
        },
    },
    services::subscription_service::{apply_tier, sync_from_stripe},
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed event, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify a Stripe webhook signature and parse the event.
///
/// # Format
///
/// `Stripe-Signature: t=<unix seconds>,v1=<hex hmac>[,v1=...]`
///
/// The HMAC-SHA256 is computed over `"<t>.<raw body>"` with the endpoint
/// secret. Any `v1` entry may match; comparison is constant-time.
///
/// # Errors
///
/// `InvalidRequest` when the header is malformed, no signature matches,
/// the timestamp is outside the tolerance, or the body is not an event.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<StripeEvent, AppError> {
    let invalid = || AppError::InvalidRequest("Invalid signature".to_string());

    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(invalid)?;
    let issued_at: i64 = timestamp.parse().map_err(|_| invalid())?;
    if signatures.is_empty() {
        return Err(invalid());
    }

    let verified = signatures.iter().any(|signature| {
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    });
    if !verified {
        return Err(invalid());
    }

    if (now - issued_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::InvalidRequest(
            "Signature timestamp outside the tolerance zone".to_string(),
        ));
    }

    serde_json::from_slice(payload)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid payload: {e}")))
}

/// Apply one verified event.
///
/// Unknown event types are logged and ignored.
pub async fn handle_event(pool: &DbPool, config: &Config, event: StripeEvent) -> Result<(), AppError> {
    let Some(kind) = StripeEventKind::parse(&event.event_type) else {
        tracing::info!("Unhandled Stripe event type: {}", event.event_type);
        return Ok(());
    };

    tracing::info!("Processing Stripe event {} ({})", event.id, event.event_type);

    let object = event.data.object;
    match kind {
        StripeEventKind::CheckoutCompleted => {
            let session_id = object.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            tracing::info!("Checkout session completed: {}", session_id);
            Ok(())
        }
        StripeEventKind::SubscriptionCreated => {
            subscription_created(pool, config, parse_object(object)?).await
        }
        StripeEventKind::SubscriptionUpdated => {
            subscription_updated(pool, parse_object(object)?).await
        }
        StripeEventKind::SubscriptionDeleted => {
            subscription_deleted(pool, parse_object(object)?).await
        }
        StripeEventKind::PaymentSucceeded => payment_succeeded(pool, parse_object(object)?).await,
        StripeEventKind::InvoicePaymentFailed => {
            invoice_payment_failed(pool, parse_object(object)?).await
        }
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(object: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(object)
        .map_err(|e| AppError::InvalidRequest(format!("Unexpected event object: {e}")))
}

async fn find_by_customer(pool: &DbPool, customer_id: &str) -> Result<Option<Subscription>, AppError> {
    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(pool)
            .await?;
    Ok(subscription)
}

async fn find_by_stripe_subscription(
    pool: &DbPool,
    stripe_subscription_id: &str,
) -> Result<Option<Subscription>, AppError> {
    let subscription = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE stripe_subscription_id = $1",
    )
    .bind(stripe_subscription_id)
    .fetch_optional(pool)
    .await?;
    Ok(subscription)
}

/// Link the new Stripe subscription and grant its tier.
async fn subscription_created(pool: &DbPool, config: &Config, remote: StripeSubscription) -> Result<(), AppError> {
    let Some(local) = find_by_customer(pool, &remote.customer).await? else {
        tracing::warn!("No subscription row for Stripe customer {}", remote.customer);
        return Ok(());
    };

    let price_id = remote.price_id().map(str::to_owned);
    let tier = price_id
        .as_deref()
        .map(|id| tier_for_price_id(config, id))
        .unwrap_or(SubscriptionTier::Free);
    let (period_start, period_end) = remote.period();

    let mut tx = pool.begin().await?;
    apply_tier(&mut tx, local.id, tier, price_id.as_deref()).await?;
    sqlx::query(
        r#"
        UPDATE subscriptions
        SET stripe_subscription_id = $2,
            status = 'active',
            cancel_at_period_end = $3,
            current_period_start = $4,
            current_period_end = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(local.id)
    .bind(&remote.id)
    .bind(remote.cancel_at_period_end)
    .bind(period_start)
    .bind(period_end)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(
        "Subscription {} linked to Stripe subscription {} ({} tier)",
        local.id,
        remote.id,
        tier
    );
    Ok(())
}

async fn subscription_updated(pool: &DbPool, remote: StripeSubscription) -> Result<(), AppError> {
    let Some(local) = find_by_stripe_subscription(pool, &remote.id).await? else {
        tracing::warn!("No subscription row for Stripe subscription {}", remote.id);
        return Ok(());
    };

    let mut conn = pool.acquire().await?;
    sync_from_stripe(&mut conn, local.id, &remote).await?;
    Ok(())
}

/// Downgrade to free once Stripe has ended the subscription.
async fn subscription_deleted(pool: &DbPool, remote: StripeSubscription) -> Result<(), AppError> {
    let Some(local) = find_by_stripe_subscription(pool, &remote.id).await? else {
        tracing::warn!("No subscription row for Stripe subscription {}", remote.id);
        return Ok(());
    };

    let mut tx = pool.begin().await?;
    apply_tier(&mut tx, local.id, SubscriptionTier::Free, None).await?;
    sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'cancelled',
            stripe_subscription_id = NULL,
            cancel_at_period_end = FALSE,
            cancelled_at = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(local.id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!("Subscription {} downgraded to free", local.id);
    Ok(())
}

/// One story credit per succeeded `individual_story` payment.
async fn payment_succeeded(pool: &DbPool, intent: StripePaymentIntent) -> Result<(), AppError> {
    if !intent.is_individual_story() {
        return Ok(());
    }

    let Some(user_id) = intent
        .metadata
        .get("user_id")
        .and_then(|id| uuid::Uuid::parse_str(id).ok())
    else {
        tracing::warn!("Payment intent {} has no user_id metadata", intent.id);
        return Ok(());
    };

    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET individual_story_credits = individual_story_credits + 1,
            updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!("No subscription row for user {}", user_id);
    } else {
        tracing::info!("Added story credit for user {} (payment {})", user_id, intent.id);
    }
    Ok(())
}

async fn invoice_payment_failed(pool: &DbPool, invoice: StripeInvoice) -> Result<(), AppError> {
    let Some(stripe_subscription_id) = invoice.subscription else {
        return Ok(());
    };

    sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'payment_failed',
            updated_at = NOW()
        WHERE stripe_subscription_id = $1
        "#,
    )
    .bind(&stripe_subscription_id)
    .execute(pool)
    .await?;

    tracing::warn!(
        "Invoice {} failed for Stripe subscription {}",
        invoice.id,
        stripe_subscription_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed","data":{"object":{"id":"in_1","subscription":"sub_1"}}}"#;

    fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(body);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn correctly_signed_event_is_accepted() {
        let now = 1_700_000_000;
        let header = sign(SECRET, now - 10, BODY);

        let event = verify_webhook_signature(BODY, &header, SECRET, now).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(
            StripeEventKind::parse(&event.event_type),
            Some(StripeEventKind::InvoicePaymentFailed)
        );
    }

    #[test]
    fn any_matching_v1_signature_is_enough() {
        let now = 1_700_000_000;
        let good = sign(SECRET, now, BODY);
        let header = format!("t={now},v1=deadbeef,{}", good.split_once(',').unwrap().1);

        assert!(verify_webhook_signature(BODY, &header, SECRET, now).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = 1_700_000_000;
        let header = sign(SECRET, now, BODY);
        let tampered = br#"{"id":"evt_2","type":"invoice.payment_failed","data":{"object":{}}}"#;

        assert!(matches!(
            verify_webhook_signature(tampered, &header, SECRET, now),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = 1_700_000_000;
        let header = sign("whsec_other", now, BODY);

        assert!(verify_webhook_signature(BODY, &header, SECRET, now).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = 1_700_000_000;
        let header = sign(SECRET, now - SIGNATURE_TOLERANCE_SECS - 1, BODY);

        assert!(verify_webhook_signature(BODY, &header, SECRET, now).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(verify_webhook_signature(BODY, "", SECRET, 0).is_err());
        assert!(verify_webhook_signature(BODY, "t=abc,v1=00", SECRET, 0).is_err());
        assert!(verify_webhook_signature(BODY, "t=0", SECRET, 0).is_err());
    }

    mod db {
        use super::*;
        use crate::{db::fixtures, services::usage_service};
        use serde_json::json;
        use uuid::Uuid;

        fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
            serde_json::from_value(json!({
                "id": "evt_test",
                "type": event_type,
                "data": { "object": object },
            }))
            .unwrap()
        }

        fn subscription_object(status: &str, price: &str, start: i64, end: i64) -> serde_json::Value {
            json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": status,
                "cancel_at_period_end": false,
                "canceled_at": null,
                "current_period_start": start,
                "current_period_end": end,
                "items": { "data": [{ "id": "si_1", "price": { "id": price } }] },
            })
        }

        async fn customer(pool: &DbPool) -> Uuid {
            let user_id = fixtures::user(pool, "parent@example.com").await;
            sqlx::query("UPDATE subscriptions SET stripe_customer_id = 'cus_1' WHERE user_id = $1")
                .bind(user_id)
                .execute(pool)
                .await
                .unwrap();
            user_id
        }

        async fn stored(pool: &DbPool, user_id: Uuid) -> Subscription {
            sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .unwrap()
        }

        /// A linked basic subscription with its period just ended and
        /// every story of it used.
        async fn exhausted_basic(pool: &DbPool, config: &Config) -> Uuid {
            let user_id = customer(pool).await;
            let now = Utc::now().timestamp();
            handle_event(
                pool,
                config,
                event(
                    "customer.subscription.created",
                    subscription_object("active", "price_plus_monthly", now - 31 * 86_400, now - 60),
                ),
            )
            .await
            .unwrap();
            sqlx::query("UPDATE subscriptions SET stories_created_this_month = 10, updated_at = NOW() WHERE user_id = $1")
                .bind(user_id)
                .execute(pool)
                .await
                .unwrap();
            user_id
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn created_links_the_customer_and_grants_the_tier(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = customer(&pool).await;
            let now = Utc::now().timestamp();

            handle_event(
                &pool,
                &config,
                event(
                    "customer.subscription.created",
                    subscription_object("active", "price_plus_monthly", now, now + 30 * 86_400),
                ),
            )
            .await
            .unwrap();

            let subscription = stored(&pool, user_id).await;
            assert_eq!(subscription.tier(), SubscriptionTier::Basic);
            assert_eq!(subscription.stripe_subscription_id.as_deref(), Some("sub_1"));
            assert_eq!(subscription.status, "active");
            assert_eq!(subscription.stories_per_month, 10);
            assert_eq!(subscription.sunshines_limit, 3);
            assert!(subscription.current_period_end.is_some());
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn updated_copies_status_from_stripe(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = customer(&pool).await;
            let now = Utc::now().timestamp();
            let object = subscription_object("active", "price_plus_monthly", now, now + 30 * 86_400);
            handle_event(&pool, &config, event("customer.subscription.created", object))
                .await
                .unwrap();

            let mut object = subscription_object("past_due", "price_plus_monthly", now, now + 30 * 86_400);
            object["cancel_at_period_end"] = json!(true);
            handle_event(&pool, &config, event("customer.subscription.updated", object))
                .await
                .unwrap();

            let subscription = stored(&pool, user_id).await;
            assert_eq!(subscription.status, "past_due");
            assert!(subscription.cancel_at_period_end);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn renewal_resets_the_monthly_counter(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = exhausted_basic(&pool, &config).await;
            assert!(!usage_service::can_generate_story(&stored(&pool, user_id).await).is_allowed());

            let now = Utc::now().timestamp();
            handle_event(
                &pool,
                &config,
                event(
                    "customer.subscription.updated",
                    subscription_object("active", "price_plus_monthly", now - 60, now + 30 * 86_400),
                ),
            )
            .await
            .unwrap();

            let subscription = usage_service::get_subscription(&pool, user_id).await.unwrap();
            assert_eq!(subscription.stories_created_this_month, 0);
            assert!(usage_service::can_generate_story(&subscription).is_allowed());
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn same_period_update_keeps_the_counter(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = exhausted_basic(&pool, &config).await;
            let before = stored(&pool, user_id).await;

            let now = Utc::now().timestamp();
            let start = before.current_period_start.unwrap().timestamp();
            handle_event(
                &pool,
                &config,
                event(
                    "customer.subscription.updated",
                    subscription_object("active", "price_plus_monthly", start, now - 60),
                ),
            )
            .await
            .unwrap();

            assert_eq!(stored(&pool, user_id).await.stories_created_this_month, 10);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn deleted_downgrades_to_free(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = customer(&pool).await;
            let now = Utc::now().timestamp();
            let object = subscription_object("active", "price_plus_monthly", now, now + 30 * 86_400);
            handle_event(&pool, &config, event("customer.subscription.created", object))
                .await
                .unwrap();

            let object = subscription_object("canceled", "price_plus_monthly", now, now + 30 * 86_400);
            handle_event(&pool, &config, event("customer.subscription.deleted", object))
                .await
                .unwrap();

            let subscription = stored(&pool, user_id).await;
            assert_eq!(subscription.tier(), SubscriptionTier::Free);
            assert_eq!(subscription.status, "cancelled");
            assert!(subscription.stripe_subscription_id.is_none());
            assert!(subscription.cancelled_at.is_some());
            assert_eq!(subscription.stories_per_month, 3);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn individual_story_payment_adds_one_credit(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = customer(&pool).await;

            let intent = |kind: &str| {
                event(
                    "payment_intent.succeeded",
                    json!({
                        "id": "pi_1",
                        "amount": 499,
                        "currency": "usd",
                        "metadata": { "type": kind, "user_id": user_id.to_string() },
                    }),
                )
            };
            handle_event(&pool, &config, intent("individual_story")).await.unwrap();
            handle_event(&pool, &config, intent("tip")).await.unwrap();

            assert_eq!(stored(&pool, user_id).await.individual_story_credits, 1);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn failed_invoice_blocks_generation(pool: DbPool) {
            let config = Config::for_tests();
            let user_id = customer(&pool).await;
            let now = Utc::now().timestamp();
            let object = subscription_object("active", "price_plus_monthly", now, now + 30 * 86_400);
            handle_event(&pool, &config, event("customer.subscription.created", object))
                .await
                .unwrap();

            handle_event(
                &pool,
                &config,
                event("invoice.payment_failed", json!({ "id": "in_1", "subscription": "sub_1" })),
            )
            .await
            .unwrap();

            let subscription = stored(&pool, user_id).await;
            assert_eq!(subscription.status, "payment_failed");
            assert!(!usage_service::can_generate_story(&subscription).is_allowed());
        }
    }
}
