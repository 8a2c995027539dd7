//! Stripe REST client.
//!
//! Stripe takes form-encoded bodies with bracketed keys
//! (`line_items[0][price]=...`) and authenticates with the secret key as a
//! bearer token.

use std::time::Duration;

use reqwest::{Client, Method};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    config::Config,
    error::AppError,
    models::webhook::{StripeList, StripePaymentIntent, StripeSubscription},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

type Form = Vec<(&'static str, String)>;

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

impl StripeClient {
    /// `None` when `STRIPE_SECRET_KEY` is not set.
    pub fn from_config(http: &Client, config: &Config) -> Option<Self> {
        let secret_key = config.stripe_secret_key.as_deref()?.trim();
        if secret_key.is_empty() {
            return None;
        }

        Some(Self {
            http: http.clone(),
            secret_key: secret_key.to_string(),
            base_url: config.stripe_api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Like `from_config` but a missing key is a 503.
    pub fn require(http: &Client, config: &Config) -> Result<Self, AppError> {
        Self::from_config(http, config).ok_or_else(|| {
            AppError::ServiceUnavailable("Payment processing is not configured".to_string())
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Option<&Form>,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT);
        if let Some(form) = form {
            req = req.form(form);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::Upstream(format!("Stripe {path} returned {status}: {message}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe {path} response unreadable: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        self.request(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &Form) -> Result<T, AppError> {
        self.request(Method::POST, path, Some(form)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        self.request(Method::DELETE, path, None).await
    }

    // Customers

    pub async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        user_id: &str,
    ) -> Result<StripeCustomer, AppError> {
        let mut form: Form = vec![
            ("email", email.to_string()),
            ("metadata[user_id]", user_id.to_string()),
        ];
        if let Some(name) = name {
            form.push(("name", name.to_string()));
        }
        self.post("/customers", &form).await
    }

    // Checkout and portal

    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
        user_id: &str,
    ) -> Result<CheckoutSession, AppError> {
        let form = checkout_form(customer_id, price_id, success_url, cancel_url, user_id);
        self.post("/checkout/sessions", &form).await
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, AppError> {
        let form: Form = vec![
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        self.post("/billing_portal/sessions", &form).await
    }

    // Payment intents

    pub async fn create_payment_intent(
        &self,
        customer_id: &str,
        amount_cents: i64,
        description: &str,
        user_id: &str,
    ) -> Result<StripePaymentIntent, AppError> {
        let form = payment_intent_form(customer_id, amount_cents, description, user_id);
        self.post("/payment_intents", &form).await
    }

    pub async fn list_payment_intents(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<StripePaymentIntent>, AppError> {
        let path = format!(
            "/payment_intents?customer={}&limit={}",
            customer_id,
            limit.clamp(1, 100)
        );
        let list: StripeList<StripePaymentIntent> = self.get(&path).await?;
        Ok(list.data)
    }

    // Subscriptions

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription, AppError> {
        self.get(&format!("/subscriptions/{subscription_id}")).await
    }

    /// Swap the subscription's single price, prorating the difference.
    pub async fn change_subscription_price(
        &self,
        subscription: &StripeSubscription,
        price_id: &str,
    ) -> Result<StripeSubscription, AppError> {
        let item = subscription.first_item().ok_or_else(|| {
            AppError::Upstream(format!("Stripe subscription {} has no items", subscription.id))
        })?;
        let form: Form = vec![
            ("items[0][id]", item.id.clone()),
            ("items[0][price]", price_id.to_string()),
            ("proration_behavior", "create_prorations".to_string()),
        ];
        self.post(&format!("/subscriptions/{}", subscription.id), &form)
            .await
    }

    pub async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> Result<StripeSubscription, AppError> {
        let form: Form = vec![("cancel_at_period_end", cancel.to_string())];
        self.post(&format!("/subscriptions/{subscription_id}"), &form)
            .await
    }

    pub async fn cancel_subscription_now(&self, subscription_id: &str) -> Result<StripeSubscription, AppError> {
        self.delete(&format!("/subscriptions/{subscription_id}")).await
    }
}

fn checkout_form(
    customer_id: &str,
    price_id: &str,
    success_url: &str,
    cancel_url: &str,
    user_id: &str,
) -> Form {
    vec![
        ("customer", customer_id.to_string()),
        ("mode", "subscription".to_string()),
        ("payment_method_types[0]", "card".to_string()),
        ("line_items[0][price]", price_id.to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        ("success_url", success_url.to_string()),
        ("cancel_url", cancel_url.to_string()),
        ("metadata[user_id]", user_id.to_string()),
    ]
}

fn payment_intent_form(customer_id: &str, amount_cents: i64, description: &str, user_id: &str) -> Form {
    vec![
        ("amount", amount_cents.to_string()),
        ("currency", "usd".to_string()),
        ("customer", customer_id.to_string()),
        ("description", description.to_string()),
        ("metadata[type]", "individual_story".to_string()),
        ("metadata[user_id]", user_id.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'a>(form: &'a Form, key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn checkout_form_uses_subscription_mode() {
        let form = checkout_form(
            "cus_123",
            "price_plus_monthly",
            "https://app.example/ok",
            "https://app.example/cancel",
            "user-1",
        );

        assert_eq!(value(&form, "mode"), Some("subscription"));
        assert_eq!(value(&form, "line_items[0][price]"), Some("price_plus_monthly"));
        assert_eq!(value(&form, "line_items[0][quantity]"), Some("1"));
        assert_eq!(value(&form, "metadata[user_id]"), Some("user-1"));
    }

    #[test]
    fn payment_intent_is_tagged_as_individual_story() {
        let form = payment_intent_form("cus_123", 500, "One-time story generation", "user-1");

        assert_eq!(value(&form, "amount"), Some("500"));
        assert_eq!(value(&form, "currency"), Some("usd"));
        assert_eq!(value(&form, "metadata[type]"), Some("individual_story"));
    }

    #[test]
    fn client_requires_secret_key() {
        let http = Client::new();
        let mut config = Config::for_tests();
        assert!(StripeClient::from_config(&http, &config).is_none());
        assert!(matches!(
            StripeClient::require(&http, &config),
            Err(AppError::ServiceUnavailable(_))
        ));

        config.stripe_secret_key = Some("sk_test_123".to_string());
        let client = StripeClient::from_config(&http, &config).unwrap();
        assert_eq!(client.base_url, "https://api.stripe.com/v1");
    }
}
