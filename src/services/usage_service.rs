//! Usage tracking - story quotas, credits and monthly resets.
//!
//! Quota decisions are pure functions over a `Subscription` row so they can
//! be tested without a database. The async functions load/update rows and
//! apply the monthly reset before any decision is made.
//!
//! # Billing Periods
//!
//! Subscriptions paid through Stripe carry `current_period_start/end`,
//! kept up to date by webhooks. Free subscriptions have no Stripe dates;
//! their period is the monthly anniversary of `created_at`, with the day
//! clamped to the length of the month (Jan 31 -> Feb 29 -> Mar 31).

use chrono::{DateTime, Datelike, Months, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::subscription::{Feature, Subscription, SubscriptionTier, UNLIMITED, UsageResponse},
};

/// Which allowance a generated story is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageType {
    IndividualCredit,
    FreeTier,
    Subscription,
    Unlimited,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::IndividualCredit => "individual_credit",
            UsageType::FreeTier => "free_tier",
            UsageType::Subscription => "subscription",
            UsageType::Unlimited => "unlimited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageDecision {
    Allowed(UsageType),
    Denied(String),
}

impl UsageDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, UsageDecision::Allowed(_))
    }
}

/// Decide whether another story may be generated.
///
/// Assumes the monthly reset has already been applied to `subscription`.
///
/// # Rules
///
/// - `payment_failed` and `cancelled` statuses are denied outright
/// - free: purchased credits first, then the monthly free allowance
/// - basic: unlimited when configured so, else the monthly allowance
/// - premium / enterprise: unlimited
pub fn can_generate_story(subscription: &Subscription) -> UsageDecision {
    match subscription.status.as_str() {
        "payment_failed" => {
            return UsageDecision::Denied(
                "Payment failed. Please update your payment method.".to_string(),
            );
        }
        "cancelled" => {
            return UsageDecision::Denied(
                "Subscription cancelled. Please reactivate to continue.".to_string(),
            );
        }
        _ => {}
    }

    let limit_reached = || {
        UsageDecision::Denied(format!(
            "Monthly limit of {} stories reached",
            subscription.stories_per_month
        ))
    };

    match subscription.tier() {
        SubscriptionTier::Free => {
            if subscription.individual_story_credits > 0 {
                UsageDecision::Allowed(UsageType::IndividualCredit)
            } else if subscription.stories_created_this_month >= subscription.stories_per_month {
                limit_reached()
            } else {
                UsageDecision::Allowed(UsageType::FreeTier)
            }
        }
        SubscriptionTier::Basic => {
            if subscription.has_unlimited_stories() {
                UsageDecision::Allowed(UsageType::Unlimited)
            } else if subscription.stories_created_this_month >= subscription.stories_per_month {
                limit_reached()
            } else {
                UsageDecision::Allowed(UsageType::Subscription)
            }
        }
        SubscriptionTier::Premium | SubscriptionTier::Enterprise => {
            UsageDecision::Allowed(UsageType::Unlimited)
        }
    }
}

/// The monthly period anchored at `anchor` that contains `at`.
pub fn period_containing(anchor: DateTime<Utc>, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let shift = |months: u32| anchor.checked_add_months(Months::new(months)).unwrap_or(anchor);

    let diff = (at.year() - anchor.year()) * 12 + at.month() as i32 - anchor.month() as i32;
    let mut months = diff.max(0) as u32;
    if months > 0 && shift(months) > at {
        months -= 1;
    }

    (shift(months), shift(months + 1))
}

/// Whether the monthly story counter must be zeroed before use.
pub fn needs_monthly_reset(subscription: &Subscription, now: DateTime<Utc>) -> bool {
    if subscription.stories_created_this_month == 0 {
        return false;
    }

    match (subscription.current_period_start, subscription.current_period_end) {
        // Only the first check after the period ends resets; later updates
        // carry a newer `updated_at`.
        (Some(_), Some(end)) => {
            now >= end && subscription.updated_at.is_none_or(|updated| updated < end)
        }
        _ => match subscription.updated_at {
            Some(last_update) => {
                let (current_start, _) = period_containing(subscription.created_at, now);
                let (last_start, _) = period_containing(subscription.created_at, last_update);
                current_start > last_start
            }
            None => false,
        },
    }
}

/// Stories left in the period; -1 when unlimited.
pub fn stories_remaining(subscription: &Subscription) -> i32 {
    subscription.stories_remaining()
}

/// Refuse when the subscription lacks `feature`.
pub fn validate_feature(subscription: &Subscription, feature: Feature) -> Result<(), AppError> {
    if subscription.has_feature(feature) {
        Ok(())
    } else {
        Err(AppError::PaymentRequired(format!(
            "Feature '{}' not available in {} tier",
            feature.as_str(),
            subscription.tier()
        )))
    }
}

/// Refuse a new profile once `active_count` reaches the tier's limit.
pub fn check_sunshine_limit(subscription: &Subscription, active_count: i64) -> Result<(), AppError> {
    if subscription.sunshines_limit == UNLIMITED {
        return Ok(());
    }
    if active_count >= i64::from(subscription.sunshines_limit) {
        return Err(AppError::PaymentRequired(format!(
            "Sunshine limit of {} reached. Upgrade to add more.",
            subscription.sunshines_limit
        )));
    }
    Ok(())
}

/// Summary served by `GET /subscription/usage`.
pub fn usage_summary(subscription: &Subscription) -> UsageResponse {
    let remaining = if subscription.tier() == SubscriptionTier::Free
        && subscription.individual_story_credits > 0
    {
        subscription.individual_story_credits
    } else {
        subscription.stories_remaining()
    };

    UsageResponse {
        stories_used: subscription.stories_created_this_month,
        stories_limit: subscription.stories_per_month,
        stories_remaining: remaining,
        individual_credits: subscription.individual_story_credits,
        subscription_tier: subscription.tier().to_string(),
        can_generate_story: can_generate_story(subscription).is_allowed(),
    }
}

/// Load the user's subscription with the monthly reset applied.
///
/// # Errors
///
/// - `SubscriptionNotFound`: the user has no subscription row
pub async fn get_subscription(pool: &DbPool, user_id: Uuid) -> Result<Subscription, AppError> {
    let subscription =
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::SubscriptionNotFound)?;

    if !needs_monthly_reset(&subscription, Utc::now()) {
        return Ok(subscription);
    }

    tracing::info!(
        "Resetting monthly story count for subscription {}",
        subscription.id
    );
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET stories_created_this_month = 0,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(subscription.id)
    .fetch_one(pool)
    .await?;

    Ok(subscription)
}

/// Counters after charging one story as `usage_type`:
/// `(stories_created_this_month, individual_story_credits)`.
///
/// Credits are spent without touching the monthly counter.
pub fn charged_counters(subscription: &Subscription, usage_type: UsageType) -> (i32, i32) {
    match usage_type {
        UsageType::IndividualCredit => (
            subscription.stories_created_this_month,
            subscription.individual_story_credits - 1,
        ),
        _ => (
            subscription.stories_created_this_month + 1,
            subscription.individual_story_credits,
        ),
    }
}

/// Lock the user's subscription row until the caller's transaction ends.
pub async fn lock_subscription(conn: &mut PgConnection, user_id: Uuid) -> Result<Subscription, AppError> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::SubscriptionNotFound)
}

/// Charge one story on the caller's transaction.
///
/// The row is locked and the allowance decided again on the locked copy,
/// so concurrent generations for one user are charged one at a time and
/// the charge commits together with the story.
///
/// # Errors
///
/// - `SubscriptionNotFound`: the user has no subscription row
/// - `PaymentRequired`: the allowance is used up
pub async fn record_story_generation(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<(UsageType, Subscription), AppError> {
    let mut subscription = lock_subscription(&mut *conn, user_id).await?;
    if needs_monthly_reset(&subscription, Utc::now()) {
        subscription.stories_created_this_month = 0;
    }

    let usage_type = match can_generate_story(&subscription) {
        UsageDecision::Allowed(usage_type) => usage_type,
        UsageDecision::Denied(reason) => return Err(AppError::PaymentRequired(reason)),
    };
    let (stories_used, credits) = charged_counters(&subscription, usage_type);

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET stories_created_this_month = $2,
            individual_story_credits = $3,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(subscription.id)
    .bind(stories_used)
    .bind(credits)
    .fetch_one(conn)
    .await?;

    Ok((usage_type, subscription))
}

/// Spend one purchased credit outside story generation.
///
/// # Errors
///
/// - `SubscriptionNotFound`: the user has no subscription row
/// - `PaymentRequired`: no credits left
pub async fn use_credit(pool: &DbPool, user_id: Uuid) -> Result<i32, AppError> {
    let remaining: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE subscriptions
        SET individual_story_credits = individual_story_credits - 1,
            stories_created_this_month = stories_created_this_month + 1,
            updated_at = NOW()
        WHERE user_id = $1 AND individual_story_credits > 0
        RETURNING individual_story_credits
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match remaining {
        Some(credits) => Ok(credits),
        None => {
            // Distinguish "no row" from "no credits"
            get_subscription(pool, user_id).await?;
            Err(AppError::PaymentRequired(
                "No story credits available".to_string(),
            ))
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn subscription(tier: SubscriptionTier) -> Subscription {
        let features = tier.features();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier: tier.as_str().to_string(),
            status: "active".to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            stripe_price_id: None,
            stories_per_month: features.stories_per_month,
            stories_created_this_month: 0,
            sunshines_limit: features.sunshines_limit,
            has_pdf_export: features.has_pdf_export,
            has_image_generation: features.has_image_generation,
            has_custom_illustrations: features.has_custom_illustrations,
            has_multi_language: features.has_multi_language,
            has_api_access: features.has_api_access,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            individual_story_credits: 0,
            created_at: Utc::now(),
            updated_at: None,
            cancelled_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::subscription;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    #[test]
    fn free_tier_uses_credits_before_allowance() {
        let mut sub = subscription(SubscriptionTier::Free);
        sub.stories_created_this_month = 3;
        sub.individual_story_credits = 2;

        assert_eq!(
            can_generate_story(&sub),
            UsageDecision::Allowed(UsageType::IndividualCredit)
        );

        sub.individual_story_credits = 0;
        assert_eq!(
            can_generate_story(&sub),
            UsageDecision::Denied("Monthly limit of 3 stories reached".to_string())
        );

        sub.stories_created_this_month = 2;
        assert_eq!(can_generate_story(&sub), UsageDecision::Allowed(UsageType::FreeTier));
    }

    #[test]
    fn basic_tier_counts_against_subscription() {
        let mut sub = subscription(SubscriptionTier::Basic);
        sub.stories_created_this_month = 9;
        assert_eq!(
            can_generate_story(&sub),
            UsageDecision::Allowed(UsageType::Subscription)
        );

        sub.stories_created_this_month = 10;
        assert!(!can_generate_story(&sub).is_allowed());

        sub.stories_per_month = UNLIMITED;
        assert_eq!(can_generate_story(&sub), UsageDecision::Allowed(UsageType::Unlimited));
    }

    #[test]
    fn premium_and_enterprise_are_unlimited() {
        for tier in [SubscriptionTier::Premium, SubscriptionTier::Enterprise] {
            let mut sub = subscription(tier);
            sub.stories_created_this_month = 500;
            assert_eq!(can_generate_story(&sub), UsageDecision::Allowed(UsageType::Unlimited));
        }
    }

    #[test]
    fn failed_or_cancelled_status_blocks_generation() {
        let mut sub = subscription(SubscriptionTier::Premium);

        sub.status = "payment_failed".to_string();
        assert_eq!(
            can_generate_story(&sub),
            UsageDecision::Denied("Payment failed. Please update your payment method.".to_string())
        );

        sub.status = "cancelled".to_string();
        assert_eq!(
            can_generate_story(&sub),
            UsageDecision::Denied(
                "Subscription cancelled. Please reactivate to continue.".to_string()
            )
        );
    }

    #[test]
    fn period_day_clamps_to_month_length() {
        let anchor = at(2024, 1, 31);

        assert_eq!(
            period_containing(anchor, at(2024, 2, 15)),
            (at(2024, 1, 31), at(2024, 2, 29))
        );
        assert_eq!(
            period_containing(anchor, at(2024, 3, 1)),
            (at(2024, 2, 29), at(2024, 3, 31))
        );
        assert_eq!(
            period_containing(anchor, at(2025, 1, 5)),
            (at(2024, 12, 31), at(2025, 1, 31))
        );
    }

    #[test]
    fn anniversary_reset_happens_once_per_period() {
        let now = Utc::now();
        let mut sub = subscription(SubscriptionTier::Free);
        sub.created_at = now - Duration::days(75);
        sub.stories_created_this_month = 3;

        sub.updated_at = Some(now - Duration::days(40));
        assert!(needs_monthly_reset(&sub, now));

        sub.updated_at = Some(now);
        assert!(!needs_monthly_reset(&sub, now));

        sub.updated_at = None;
        assert!(!needs_monthly_reset(&sub, now));
    }

    #[test]
    fn stripe_period_end_triggers_single_reset() {
        let now = Utc::now();
        let mut sub = subscription(SubscriptionTier::Basic);
        sub.stories_created_this_month = 10;
        sub.current_period_start = Some(now - Duration::days(31));
        sub.current_period_end = Some(now - Duration::days(1));
        sub.updated_at = Some(now - Duration::days(2));

        assert!(needs_monthly_reset(&sub, now));

        sub.updated_at = Some(now - Duration::hours(1));
        assert!(!needs_monthly_reset(&sub, now));

        sub.current_period_end = Some(now + Duration::days(5));
        sub.updated_at = Some(now - Duration::days(2));
        assert!(!needs_monthly_reset(&sub, now));
    }

    #[test]
    fn credits_are_charged_without_touching_the_counter() {
        let mut sub = subscription(SubscriptionTier::Free);
        sub.stories_created_this_month = 3;
        sub.individual_story_credits = 2;

        assert_eq!(charged_counters(&sub, UsageType::IndividualCredit), (3, 1));
        assert_eq!(charged_counters(&sub, UsageType::FreeTier), (4, 2));
    }

    #[test]
    fn usage_summary_reports_credits_for_free_tier() {
        let mut sub = subscription(SubscriptionTier::Free);
        sub.stories_created_this_month = 3;
        sub.individual_story_credits = 2;

        let summary = usage_summary(&sub);
        assert_eq!(summary.stories_remaining, 2);
        assert_eq!(summary.subscription_tier, "free");
        assert!(summary.can_generate_story);

        let premium = usage_summary(&subscription(SubscriptionTier::Premium));
        assert_eq!(premium.stories_remaining, UNLIMITED);
    }

    #[test]
    fn sunshine_limit_and_feature_gate() {
        let free = subscription(SubscriptionTier::Free);
        assert!(check_sunshine_limit(&free, 0).is_ok());
        assert!(matches!(
            check_sunshine_limit(&free, 1),
            Err(AppError::PaymentRequired(msg)) if msg == "Sunshine limit of 1 reached. Upgrade to add more."
        ));
        assert!(check_sunshine_limit(&subscription(SubscriptionTier::Premium), 99).is_ok());

        assert!(validate_feature(&free, Feature::ImageGeneration).is_ok());
        assert!(matches!(
            validate_feature(&free, Feature::MultiLanguage),
            Err(AppError::PaymentRequired(msg)) if msg == "Feature 'multi_language' not available in free tier"
        ));
    }
}
