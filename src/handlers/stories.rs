//! Story HTTP handlers.
//!
//! This module implements the `/api/v1/stories` endpoints:
//! - POST /generate - generate a personalised story
//! - GET /history, GET /{id} - the user's library
//! - PUT /{id}/favorite, POST /{id}/rate, DELETE /{id}
//! - GET /example - public sample story

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::story::{
        ExampleStory, FavoriteResponse, GenerateStoryRequest, RateStoryRequest, RatingResponse,
        StoryGenerationResponse, StoryHistoryItem, StoryHistoryQuery, StoryResponse,
    },
    services::story_service,
    state::AppState,
    validation::validate_request,
};

/// Generate a story for one of the user's profiles.
///
/// # Endpoint
///
/// `POST /api/v1/stories/generate`
///
/// # Request Body
///
/// ```json
/// {
///   "sunshine_id": "550e8400-e29b-41d4-a716-446655440000",
///   "fear_or_challenge": "going to the dentist",
///   "tone": "calm"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: the story, its scenes and image URLs, and how
///   the story was charged (`usage_type`, `credits_remaining`)
/// - **Error (402)**: quota exhausted, payment failed or subscription
///   cancelled; the message says which
/// - **Error (404)**: profile not found
///
/// # Degradation
///
/// The request still succeeds when the language model fails: a short
/// fallback story is stored instead. Failed illustrations become
/// placeholder URLs.
pub async fn generate_story(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<GenerateStoryRequest>,
) -> Result<Json<StoryGenerationResponse>, AppError> {
    validate_request(&request)?;

    let response = story_service::generate_story(&state, auth.user_id, request).await?;
    Ok(Json(response))
}

/// Newest-first summaries. `limit` is capped at 100.
pub async fn story_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<StoryHistoryQuery>,
) -> Result<Json<Vec<StoryHistoryItem>>, AppError> {
    let items =
        story_service::story_history(&state.pool, auth.user_id, query.limit, query.offset).await?;
    Ok(Json(items))
}

/// Full story; counts as a read.
pub async fn get_story(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(story_id): Path<Uuid>,
) -> Result<Json<StoryResponse>, AppError> {
    let story = story_service::read_story(&state.pool, auth.user_id, story_id).await?;
    Ok(Json(story.into()))
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(story_id): Path<Uuid>,
) -> Result<Json<FavoriteResponse>, AppError> {
    let is_favorite = story_service::toggle_favorite(&state.pool, auth.user_id, story_id).await?;
    Ok(Json(FavoriteResponse { is_favorite }))
}

/// # Response
///
/// - **Error (400)**: rating outside 1-5
pub async fn rate_story(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(story_id): Path<Uuid>,
    Json(request): Json<RateStoryRequest>,
) -> Result<Json<RatingResponse>, AppError> {
    validate_request(&request)?;

    let rating =
        story_service::rate_story(&state.pool, auth.user_id, story_id, request.rating).await?;
    Ok(Json(RatingResponse { rating }))
}

pub async fn delete_story(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(story_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    story_service::delete_story(&state.pool, auth.user_id, story_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Public sample shown before sign-up.
pub async fn example_story() -> Json<ExampleStory> {
    Json(ExampleStory::emma())
}
