//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, quota checks, and calls to the
//! hosted providers (OpenAI, Stripe, Google/Apple).

pub mod oauth_service;
pub mod openai_client;
pub mod story_service;
pub mod stripe_client;
pub mod subscription_service;
pub mod sunshine_service;
pub mod usage_service;
pub mod user_service;
pub mod webhook_service;
