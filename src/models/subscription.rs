//! Subscription tiers, plan catalogue and billing request/response types.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Marker for "no limit" in `stories_per_month` and `sunshines_limit`.
pub const UNLIMITED: i32 = -1;

/// Price of a single story bought without a subscription, in cents.
pub const INDIVIDUAL_STORY_PRICE_CENTS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Monthly price in cents.
    pub fn price_cents(&self) -> i64 {
        match self {
            SubscriptionTier::Free => 0,
            SubscriptionTier::Basic => 1000,
            SubscriptionTier::Premium => 3000,
            SubscriptionTier::Enterprise => 9999,
        }
    }

    /// Limits and feature flags granted by the tier.
    pub fn features(&self) -> TierFeatures {
        match self {
            SubscriptionTier::Free => TierFeatures {
                stories_per_month: 3,
                sunshines_limit: 1,
                has_pdf_export: false,
                has_image_generation: true,
                has_custom_illustrations: false,
                has_multi_language: false,
                has_api_access: false,
            },
            SubscriptionTier::Basic => TierFeatures {
                stories_per_month: 10,
                sunshines_limit: 3,
                has_pdf_export: true,
                has_image_generation: true,
                has_custom_illustrations: false,
                has_multi_language: true,
                has_api_access: false,
            },
            SubscriptionTier::Premium | SubscriptionTier::Enterprise => TierFeatures {
                stories_per_month: UNLIMITED,
                sunshines_limit: UNLIMITED,
                has_pdf_export: true,
                has_image_generation: true,
                has_custom_illustrations: true,
                has_multi_language: true,
                has_api_access: true,
            },
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "basic" => Ok(SubscriptionTier::Basic),
            "premium" => Ok(SubscriptionTier::Premium),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(format!("unknown subscription tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierFeatures {
    pub stories_per_month: i32,
    pub sunshines_limit: i32,
    pub has_pdf_export: bool,
    pub has_image_generation: bool,
    pub has_custom_illustrations: bool,
    pub has_multi_language: bool,
    pub has_api_access: bool,
}

/// Feature names accepted by the feature gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    PdfExport,
    ImageGeneration,
    CustomIllustrations,
    MultiLanguage,
    ApiAccess,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::PdfExport => "pdf_export",
            Feature::ImageGeneration => "image_generation",
            Feature::CustomIllustrations => "custom_illustrations",
            Feature::MultiLanguage => "multi_language",
            Feature::ApiAccess => "api_access",
        }
    }
}

/// Represents a subscription record from the database.
///
/// # Database Table
///
/// Maps to the `subscriptions` table, one row per user. `tier` and
/// `status` are stored as text; `status` may also hold raw Stripe
/// statuses (`trialing`, `past_due`, ...) copied in by webhooks.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: String,
    pub status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,

    /// -1 = unlimited
    pub stories_per_month: i32,
    pub stories_created_this_month: i32,

    /// -1 = unlimited
    pub sunshines_limit: i32,

    pub has_pdf_export: bool,
    pub has_image_generation: bool,
    pub has_custom_illustrations: bool,
    pub has_multi_language: bool,
    pub has_api_access: bool,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,

    /// One-off stories bought through payment intents
    pub individual_story_credits: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Unknown tier strings are treated as free.
    pub fn tier(&self) -> SubscriptionTier {
        self.tier.parse().unwrap_or(SubscriptionTier::Free)
    }

    pub fn has_unlimited_stories(&self) -> bool {
        self.stories_per_month == UNLIMITED
    }

    /// -1 when unlimited, otherwise never negative.
    pub fn stories_remaining(&self) -> i32 {
        if self.has_unlimited_stories() {
            UNLIMITED
        } else {
            (self.stories_per_month - self.stories_created_this_month).max(0)
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::PdfExport => self.has_pdf_export,
            Feature::ImageGeneration => self.has_image_generation,
            Feature::CustomIllustrations => self.has_custom_illustrations,
            Feature::MultiLanguage => self.has_multi_language,
            Feature::ApiAccess => self.has_api_access,
        }
    }
}

/// Subscription as returned by `/subscription/current` and `/auth/me`.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: String,
    pub status: String,
    pub stories_per_month: i32,
    pub stories_created_this_month: i32,
    pub sunshines_limit: i32,
    pub has_pdf_export: bool,
    pub has_image_generation: bool,
    pub has_custom_illustrations: bool,
    pub has_multi_language: bool,
    pub has_api_access: bool,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub individual_story_credits: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub can_create_story: bool,
    pub stories_remaining: i32,
}

impl SubscriptionResponse {
    pub fn new(subscription: Subscription, can_create_story: bool) -> Self {
        let stories_remaining = subscription.stories_remaining();
        Self {
            id: subscription.id,
            user_id: subscription.user_id,
            tier: subscription.tier,
            status: subscription.status,
            stories_per_month: subscription.stories_per_month,
            stories_created_this_month: subscription.stories_created_this_month,
            sunshines_limit: subscription.sunshines_limit,
            has_pdf_export: subscription.has_pdf_export,
            has_image_generation: subscription.has_image_generation,
            has_custom_illustrations: subscription.has_custom_illustrations,
            has_multi_language: subscription.has_multi_language,
            has_api_access: subscription.has_api_access,
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            individual_story_credits: subscription.individual_story_credits,
            created_at: subscription.created_at,
            updated_at: subscription.updated_at,
            cancelled_at: subscription.cancelled_at,
            can_create_story,
            stories_remaining,
        }
    }
}

/// A purchasable plan in the public catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub name: String,

    /// `"per_use"` or `"subscription"`
    #[serde(rename = "type")]
    pub plan_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_story: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_monthly: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_price_id: Option<String>,

    pub features: TierFeatures,
}

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: BTreeMap<String, Plan>,

    /// Stripe.js key for the frontend checkout form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publishable_key: Option<String>,
}

/// Subscription plans that can be bought through Stripe Checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaidPlan {
    Plus,
    Unlimited,
}

impl PaidPlan {
    pub fn parse(plan: &str) -> Option<Self> {
        match plan.to_ascii_lowercase().as_str() {
            "plus" => Some(PaidPlan::Plus),
            "unlimited" => Some(PaidPlan::Unlimited),
            _ => None,
        }
    }

    pub fn tier(&self) -> SubscriptionTier {
        match self {
            PaidPlan::Plus => SubscriptionTier::Basic,
            PaidPlan::Unlimited => SubscriptionTier::Premium,
        }
    }

    pub fn price_id<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            PaidPlan::Plus => &config.stripe_plus_price_id,
            PaidPlan::Unlimited => &config.stripe_unlimited_price_id,
        }
    }
}

/// Map a Stripe price id back to the tier it grants.
pub fn tier_for_price_id(config: &Config, price_id: &str) -> SubscriptionTier {
    if price_id == config.stripe_plus_price_id {
        SubscriptionTier::Basic
    } else if price_id == config.stripe_unlimited_price_id {
        SubscriptionTier::Premium
    } else {
        SubscriptionTier::Free
    }
}

/// The `individual`, `plus` and `unlimited` plans with live price ids.
pub fn plan_catalogue(config: &Config) -> PlansResponse {
    let mut plans = BTreeMap::new();

    plans.insert(
        "individual".to_string(),
        Plan {
            name: "Individual".to_string(),
            plan_type: "per_use".to_string(),
            price_per_story: Some(INDIVIDUAL_STORY_PRICE_CENTS),
            price_monthly: None,
            stripe_price_id: None,
            features: TierFeatures {
                stories_per_month: 1,
                sunshines_limit: 1,
                has_pdf_export: true,
                has_image_generation: true,
                has_custom_illustrations: false,
                has_multi_language: false,
                has_api_access: false,
            },
        },
    );

    for (key, name, plan) in [
        ("plus", "Plus", PaidPlan::Plus),
        ("unlimited", "Unlimited", PaidPlan::Unlimited),
    ] {
        let tier = plan.tier();
        plans.insert(
            key.to_string(),
            Plan {
                name: name.to_string(),
                plan_type: "subscription".to_string(),
                price_per_story: None,
                price_monthly: Some(tier.price_cents()),
                stripe_price_id: Some(plan.price_id(config).to_string()),
                features: tier.features(),
            },
        );
    }

    PlansResponse {
        plans,
        publishable_key: config
            .stripe_publishable_key
            .clone()
            .filter(|key| !key.trim().is_empty()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentRequest {
    #[serde(default = "default_payment_description")]
    pub description: String,
}

fn default_payment_description() -> String {
    "One-time story generation".to_string()
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Cancel now instead of at the end of the billing period
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    pub return_url: String,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub portal_url: String,
}

/// # JSON Example
///
/// ```json
/// {
///   "stories_used": 2,
///   "stories_limit": 3,
///   "stories_remaining": 1,
///   "individual_credits": 0,
///   "subscription_tier": "free",
///   "can_generate_story": true
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub stories_used: i32,
    pub stories_limit: i32,
    pub stories_remaining: i32,
    pub individual_credits: i32,
    pub subscription_tier: String,
    pub can_generate_story: bool,
}

#[derive(Debug, Serialize)]
pub struct UseCreditResponse {
    pub message: String,
    pub credits_remaining: i32,
}

#[derive(Debug, Deserialize)]
pub struct PaymentHistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct PaymentRecord {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub created: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<PaymentRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table_matches_pricing() {
        let free = SubscriptionTier::Free.features();
        assert_eq!((free.stories_per_month, free.sunshines_limit), (3, 1));
        assert!(!free.has_pdf_export);
        assert!(free.has_image_generation);
        assert!(!free.has_multi_language);

        let basic = SubscriptionTier::Basic.features();
        assert_eq!((basic.stories_per_month, basic.sunshines_limit), (10, 3));
        assert!(basic.has_multi_language);
        assert!(!basic.has_custom_illustrations);

        let premium = SubscriptionTier::Premium.features();
        assert_eq!(premium.stories_per_month, UNLIMITED);
        assert!(premium.has_api_access);
        assert_eq!(SubscriptionTier::Enterprise.features(), premium);
    }

    #[test]
    fn price_ids_map_to_tiers() {
        let config = Config::for_tests();

        assert_eq!(tier_for_price_id(&config, "price_plus_monthly"), SubscriptionTier::Basic);
        assert_eq!(
            tier_for_price_id(&config, "price_unlimited_monthly"),
            SubscriptionTier::Premium
        );
        assert_eq!(tier_for_price_id(&config, "price_mystery"), SubscriptionTier::Free);
    }

    #[test]
    fn catalogue_lists_three_plans() {
        let config = Config::for_tests();
        let catalogue = plan_catalogue(&config);

        assert_eq!(catalogue.plans.len(), 3);
        assert_eq!(catalogue.plans["individual"].price_per_story, Some(500));
        assert_eq!(catalogue.plans["plus"].price_monthly, Some(1000));
        assert_eq!(
            catalogue.plans["unlimited"].stripe_price_id.as_deref(),
            Some("price_unlimited_monthly")
        );
        assert!(catalogue.publishable_key.is_none());
    }

    #[test]
    fn catalogue_exposes_publishable_key() {
        let mut config = Config::for_tests();
        config.stripe_publishable_key = Some("pk_test_123".to_string());

        let body = serde_json::to_value(plan_catalogue(&config)).unwrap();
        assert_eq!(body["publishable_key"], "pk_test_123");
    }

    #[test]
    fn paid_plan_parsing_rejects_individual() {
        assert_eq!(PaidPlan::parse("Plus"), Some(PaidPlan::Plus));
        assert_eq!(PaidPlan::parse("unlimited"), Some(PaidPlan::Unlimited));
        assert_eq!(PaidPlan::parse("individual"), None);
    }

    #[test]
    fn tier_round_trips_through_text() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Basic,
            SubscriptionTier::Premium,
            SubscriptionTier::Enterprise,
        ] {
            assert_eq!(tier.as_str().parse::<SubscriptionTier>(), Ok(tier));
        }
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }
}
