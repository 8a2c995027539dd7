//! Data models representing database entities and API bodies.
//!
//! Row structs derive `sqlx::FromRow`; request/response structs live next
//! to the table they describe.

/// Generated stories
pub mod story;
/// Subscription tiers and billing
pub mod subscription;
/// Child profiles and their family, comfort items and traits
pub mod sunshine;
/// Users and authentication bodies
pub mod user;
/// Stripe webhook events
pub mod webhook;
