//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Validates it and calls into a service
//! 3. Returns HTTP response (JSON, status code)

/// Register, login, OAuth and account endpoints
pub mod auth;

/// API info, health checks, CORS test and route catalogue
pub mod health;

/// Story generation and library endpoints
pub mod stories;

/// Plans, Stripe checkout and usage endpoints
pub mod subscription;

/// Child profile endpoints
pub mod sunshines;

/// Stripe webhook receiver
pub mod webhooks;
