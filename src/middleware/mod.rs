//! HTTP middleware components.
//!
//! Middleware run before route handlers. They can:
//! - Authenticate requests
//! - Answer CORS pre-flight requests
//! - Short-circuit requests (reject unauthorized)

/// JWT bearer authentication middleware
pub mod auth;

/// Origin allow-list and CORS layer
pub mod cors;
