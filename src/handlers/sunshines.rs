//! Sunshine profile HTTP handlers.
//!
//! This module implements the `/api/v1/sunshines` endpoints: the child
//! profiles stories are personalised for, plus their family members,
//! comfort items and personality traits.
//!
//! Every lookup is scoped to the authenticated user. A profile owned by
//! someone else answers 404 exactly like a missing one.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::sunshine::{
        CharacterReference, ComfortItemCreate, ComfortItemResponse, ComfortItemUpdate,
        DeleteSunshineQuery, FamilyMemberCreate, FamilyMemberResponse, FamilyMemberUpdate,
        ListSunshinesQuery, PersonalityTraitCreate, PersonalityTraitResponse, SunshineCreate,
        SunshineResponse, SunshineSummary, SunshineUpdate,
    },
    services::sunshine_service,
    state::AppState,
    validation::validate_request,
};

/// Create a profile.
///
/// # Endpoint
///
/// `POST /api/v1/sunshines`
///
/// # Request Body
///
/// ```json
/// {
///   "name": "Maya",
///   "birthdate": "2019-04-12",
///   "gender": "female",
///   "favorite_color": "purple",
///   "fears": ["the dark"],
///   "personality_traits": [{ "trait": "brave", "strength": 4 }]
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the full profile
/// - **Error (400)**: validation failed (e.g. trait strength outside 1-5)
/// - **Error (402)**: the plan's profile limit is reached
pub async fn create_sunshine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SunshineCreate>,
) -> Result<impl IntoResponse, AppError> {
    validate_request(&request)?;

    let details = sunshine_service::create_sunshine(&state.pool, auth.user_id, request).await?;

    Ok((StatusCode::CREATED, Json(SunshineResponse::from(details))))
}

/// List profile summaries, newest first.
///
/// `?include_inactive=true` also returns deactivated profiles.
pub async fn list_sunshines(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListSunshinesQuery>,
) -> Result<Json<Vec<SunshineSummary>>, AppError> {
    let sunshines =
        sunshine_service::list_sunshines(&state.pool, auth.user_id, query.include_inactive).await?;
    Ok(Json(sunshines))
}

pub async fn get_sunshine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
) -> Result<Json<SunshineResponse>, AppError> {
    let details =
        sunshine_service::get_sunshine_details(&state.pool, auth.user_id, sunshine_id).await?;
    Ok(Json(details.into()))
}

/// Partial update; only fields present in the body change.
pub async fn update_sunshine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
    Json(request): Json<SunshineUpdate>,
) -> Result<Json<SunshineResponse>, AppError> {
    validate_request(&request)?;

    let details =
        sunshine_service::update_sunshine(&state.pool, auth.user_id, sunshine_id, request).await?;
    Ok(Json(details.into()))
}

/// Deactivate a profile, or remove it with `?permanent=true`.
///
/// Stories generated for a permanently deleted profile are kept.
pub async fn delete_sunshine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
    Query(query): Query<DeleteSunshineQuery>,
) -> Result<StatusCode, AppError> {
    sunshine_service::delete_sunshine(&state.pool, auth.user_id, sunshine_id, query.permanent)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Everything needed to draw and describe the child consistently.
pub async fn character_reference(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
) -> Result<Json<CharacterReference>, AppError> {
    let reference =
        sunshine_service::character_reference(&state.pool, auth.user_id, sunshine_id).await?;
    Ok(Json(reference))
}

// Family members

pub async fn add_family_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
    Json(request): Json<FamilyMemberCreate>,
) -> Result<impl IntoResponse, AppError> {
    validate_request(&request)?;

    let member =
        sunshine_service::add_family_member(&state.pool, auth.user_id, sunshine_id, request)
            .await?;
    Ok((StatusCode::CREATED, Json(FamilyMemberResponse::from(member))))
}

pub async fn update_family_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<FamilyMemberUpdate>,
) -> Result<Json<FamilyMemberResponse>, AppError> {
    validate_request(&request)?;

    let member =
        sunshine_service::update_family_member(&state.pool, auth.user_id, member_id, request)
            .await?;
    Ok(Json(member.into()))
}

pub async fn delete_family_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(member_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    sunshine_service::delete_family_member(&state.pool, auth.user_id, member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Comfort items

pub async fn add_comfort_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
    Json(request): Json<ComfortItemCreate>,
) -> Result<impl IntoResponse, AppError> {
    validate_request(&request)?;

    let item =
        sunshine_service::add_comfort_item(&state.pool, auth.user_id, sunshine_id, request).await?;
    Ok((StatusCode::CREATED, Json(ComfortItemResponse::from(item))))
}

pub async fn update_comfort_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<ComfortItemUpdate>,
) -> Result<Json<ComfortItemResponse>, AppError> {
    validate_request(&request)?;

    let item =
        sunshine_service::update_comfort_item(&state.pool, auth.user_id, item_id, request).await?;
    Ok(Json(item.into()))
}

pub async fn delete_comfort_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    sunshine_service::delete_comfort_item(&state.pool, auth.user_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Personality traits

/// # Response
///
/// - **Error (400)**: strength outside 1-5
pub async fn add_personality_trait(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(sunshine_id): Path<Uuid>,
    Json(request): Json<PersonalityTraitCreate>,
) -> Result<impl IntoResponse, AppError> {
    validate_request(&request)?;

    let personality_trait =
        sunshine_service::add_personality_trait(&state.pool, auth.user_id, sunshine_id, request)
            .await?;
    Ok((
        StatusCode::CREATED,
        Json(PersonalityTraitResponse::from(personality_trait)),
    ))
}

pub async fn delete_personality_trait(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(trait_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    sunshine_service::delete_personality_trait(&state.pool, auth.user_id, trait_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
