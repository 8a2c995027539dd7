//! Stripe webhook event models.
//!
//! Stripe POSTs events to `/api/v1/subscription/webhook` signed with the
//! endpoint secret. Only the fields the handlers act on are modelled; the
//! rest of each object is ignored during deserialization.
//!
//! # Webhook Flow
//!
//! 1. Checkout or the customer portal changes a subscription at Stripe
//! 2. Stripe sends `customer.subscription.*` / `invoice.*` / `payment_intent.*`
//! 3. The signature is verified against `STRIPE_WEBHOOK_SECRET`
//! 4. The local `subscriptions` row is brought in line with Stripe

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope of every Stripe event.
///
/// # Example
///
/// ```json
/// {
///   "id": "evt_1NG8Du2eZvKYlo2CUI79vXWy",
///   "type": "customer.subscription.updated",
///   "data": { "object": { "id": "sub_123", "status": "active", ... } }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    /// Parsed again into a concrete object once the type is known.
    pub object: serde_json::Value,
}

/// Event types with a local side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeEventKind {
    CheckoutCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    PaymentSucceeded,
    InvoicePaymentFailed,
}

impl StripeEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "checkout.session.completed" => Some(Self::CheckoutCompleted),
            "customer.subscription.created" => Some(Self::SubscriptionCreated),
            "customer.subscription.updated" => Some(Self::SubscriptionUpdated),
            "customer.subscription.deleted" => Some(Self::SubscriptionDeleted),
            "payment_intent.succeeded" => Some(Self::PaymentSucceeded),
            "invoice.payment_failed" => Some(Self::InvoicePaymentFailed),
            _ => None,
        }
    }
}

/// Stripe list wrapper (`{"object":"list","data":[...]}`).
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
    /// Newer API versions report the period per item.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

/// A Stripe subscription object, as sent in events and returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub items: StripeList<StripeSubscriptionItem>,
}

impl StripeSubscription {
    pub fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    pub fn price_id(&self) -> Option<&str> {
        self.first_item().map(|item| item.price.id.as_str())
    }

    /// Period bounds from the subscription, falling back to its first item.
    pub fn period(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let item = self.first_item();
        let start = self
            .current_period_start
            .or_else(|| item.and_then(|i| i.current_period_start));
        let end = self
            .current_period_end
            .or_else(|| item.and_then(|i| i.current_period_end));
        (start.and_then(timestamp), end.and_then(timestamp))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    pub description: Option<String>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub status: String,
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripePaymentIntent {
    /// Payment intents created for a single story carry `type=individual_story`.
    pub fn is_individual_story(&self) -> bool {
        self.metadata.get("type").map(String::as_str) == Some("individual_story")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub subscription: Option<String>,
}

/// Body returned to Stripe.
///
/// Always 200 after a valid signature so Stripe does not retry events whose
/// handling failed locally.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookAck {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: "success".to_string(),
            error: Some(error),
        }
    }
}

pub fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_period_falls_back_to_first_item() {
        let subscription: StripeSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "canceled_at": null,
            "items": { "data": [{
                "id": "si_1",
                "price": { "id": "price_plus_monthly" },
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000
            }]}
        }))
        .unwrap();

        let (start, end) = subscription.period();
        assert_eq!(start.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(end.unwrap().timestamp(), 1_702_592_000);
        assert_eq!(subscription.price_id(), Some("price_plus_monthly"));
        assert!(!subscription.cancel_at_period_end);
    }

    #[test]
    fn only_story_payments_are_individual() {
        let mut intent: StripePaymentIntent =
            serde_json::from_value(serde_json::json!({ "id": "pi_1" })).unwrap();
        assert!(!intent.is_individual_story());

        intent
            .metadata
            .insert("type".to_string(), "individual_story".to_string());
        assert!(intent.is_individual_story());
    }

    #[test]
    fn unknown_event_types_have_no_kind() {
        assert_eq!(
            StripeEventKind::parse("invoice.payment_failed"),
            Some(StripeEventKind::InvoicePaymentFailed)
        );
        assert_eq!(StripeEventKind::parse("charge.refunded"), None);
    }
}
