//! HTTP router: route table, authentication and cross-cutting layers.

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::{
    handlers::{auth, health, stories, subscription, sunshines, webhooks},
    middleware::{self, cors::cors_layer},
    state::AppState,
};

/// Build the application router.
///
/// # Layers
///
/// - Protected routes sit behind the JWT middleware (`route_layer`, so
///   unknown paths still 404 instead of 401)
/// - `TraceLayer` logs every request
/// - `CorsLayer` is outermost and answers pre-flight requests itself
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        // Utility
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .route("/api/v1/cors-test", get(health::cors_test))
        .route("/docs", get(health::docs))
        // Auth
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/oauth/login", post(auth::oauth_login))
        .route("/api/v1/auth/oauth/exchange", post(auth::oauth_exchange))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        // Stories and billing
        .route("/api/v1/stories/example", get(stories::example_story))
        .route("/api/v1/subscription/plans", get(subscription::plans))
        .route("/api/v1/subscription/webhook", post(webhooks::stripe_webhook));

    let authenticated_routes = Router::new()
        // Account
        .route("/api/v1/auth/me", get(auth::me))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/account", delete(auth::delete_account))
        // Sunshine profiles
        .route(
            "/api/v1/sunshines",
            post(sunshines::create_sunshine).get(sunshines::list_sunshines),
        )
        .route(
            "/api/v1/sunshines/{id}",
            get(sunshines::get_sunshine)
                .put(sunshines::update_sunshine)
                .delete(sunshines::delete_sunshine),
        )
        .route(
            "/api/v1/sunshines/{id}/character-reference",
            get(sunshines::character_reference),
        )
        .route(
            "/api/v1/sunshines/{id}/family",
            post(sunshines::add_family_member),
        )
        .route(
            "/api/v1/sunshines/family/{member_id}",
            put(sunshines::update_family_member).delete(sunshines::delete_family_member),
        )
        .route(
            "/api/v1/sunshines/{id}/comfort-items",
            post(sunshines::add_comfort_item),
        )
        .route(
            "/api/v1/sunshines/comfort-items/{item_id}",
            put(sunshines::update_comfort_item).delete(sunshines::delete_comfort_item),
        )
        .route(
            "/api/v1/sunshines/{id}/personality-traits",
            post(sunshines::add_personality_trait),
        )
        .route(
            "/api/v1/sunshines/personality-traits/{trait_id}",
            delete(sunshines::delete_personality_trait),
        )
        // Stories
        .route("/api/v1/stories/generate", post(stories::generate_story))
        .route("/api/v1/stories/history", get(stories::story_history))
        .route(
            "/api/v1/stories/{id}",
            get(stories::get_story).delete(stories::delete_story),
        )
        .route("/api/v1/stories/{id}/favorite", put(stories::toggle_favorite))
        .route("/api/v1/stories/{id}/rate", post(stories::rate_story))
        // Subscription
        .route(
            "/api/v1/subscription/current",
            get(subscription::current_subscription),
        )
        .route(
            "/api/v1/subscription/checkout",
            post(subscription::create_checkout),
        )
        .route(
            "/api/v1/subscription/payment-intent",
            post(subscription::create_payment_intent),
        )
        .route("/api/v1/subscription/update", put(subscription::update_plan))
        .route(
            "/api/v1/subscription/cancel",
            post(subscription::cancel_subscription),
        )
        .route(
            "/api/v1/subscription/reactivate",
            post(subscription::reactivate_subscription),
        )
        .route("/api/v1/subscription/portal", post(subscription::customer_portal))
        .route("/api/v1/subscription/usage", get(subscription::usage))
        .route("/api/v1/subscription/use-credit", post(subscription::use_credit))
        .route(
            "/api/v1/subscription/history",
            get(subscription::payment_history),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
