//! Sunshine service - child profile CRUD and its nested records.
//!
//! Every query is scoped to the authenticated user. Child rows (family
//! members, comfort items, traits) are reached through a join on
//! `sunshines.user_id`, so a foreign id behaves exactly like a missing one.

use chrono::Utc;
use sqlx::{PgConnection, types::Json};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::sunshine::{
        CharacterReference, ComfortItem, ComfortItemCreate, ComfortItemUpdate, FamilyMember,
        FamilyMemberCreate, FamilyMemberUpdate, PersonalityTrait, PersonalityTraitCreate, Sunshine,
        SunshineCreate, SunshineDetails, SunshineSummary, SunshineSummaryRow, SunshineUpdate,
    },
    services::usage_service,
};

/// Fetch one profile owned by `user_id`.
///
/// # Errors
///
/// - `SunshineNotFound`: no such profile for this user
pub async fn get_sunshine(pool: &DbPool, user_id: Uuid, sunshine_id: Uuid) -> Result<Sunshine, AppError> {
    sqlx::query_as::<_, Sunshine>("SELECT * FROM sunshines WHERE id = $1 AND user_id = $2")
        .bind(sunshine_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::SunshineNotFound)
}

/// Fetch a profile together with its family, comfort items, traits and
/// story count.
pub async fn get_sunshine_details(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
) -> Result<SunshineDetails, AppError> {
    let sunshine = get_sunshine(pool, user_id, sunshine_id).await?;
    load_details(pool, sunshine).await
}

async fn load_details(pool: &DbPool, sunshine: Sunshine) -> Result<SunshineDetails, AppError> {
    let family_members = sqlx::query_as::<_, FamilyMember>(
        "SELECT * FROM family_members WHERE sunshine_id = $1 ORDER BY created_at",
    )
    .bind(sunshine.id)
    .fetch_all(pool)
    .await?;

    let comfort_items = sqlx::query_as::<_, ComfortItem>(
        "SELECT * FROM comfort_items WHERE sunshine_id = $1 ORDER BY created_at",
    )
    .bind(sunshine.id)
    .fetch_all(pool)
    .await?;

    let personality_traits = sqlx::query_as::<_, PersonalityTrait>(
        "SELECT * FROM personality_traits WHERE sunshine_id = $1 ORDER BY created_at",
    )
    .bind(sunshine.id)
    .fetch_all(pool)
    .await?;

    let stories_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stories WHERE sunshine_id = $1")
        .bind(sunshine.id)
        .fetch_one(pool)
        .await?;

    Ok(SunshineDetails {
        sunshine,
        family_members,
        comfort_items,
        personality_traits,
        stories_count,
    })
}

/// List the user's profiles, newest first.
pub async fn list_sunshines(
    pool: &DbPool,
    user_id: Uuid,
    include_inactive: bool,
) -> Result<Vec<SunshineSummary>, AppError> {
    let rows = sqlx::query_as::<_, SunshineSummaryRow>(
        r#"
        SELECT s.id, s.name, s.nickname, s.birthdate, s.gender, s.is_active, s.created_at,
               (SELECT COUNT(*) FROM stories st WHERE st.sunshine_id = s.id) AS stories_count
        FROM sunshines s
        WHERE s.user_id = $1 AND ($2 OR s.is_active)
        ORDER BY s.created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(include_inactive)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Refuse another active profile once the tier's limit is reached.
///
/// Holds the subscription row lock for the rest of the caller's
/// transaction, so concurrent creates for one user are counted in turn.
async fn ensure_profile_slot(conn: &mut PgConnection, user_id: Uuid) -> Result<(), AppError> {
    let subscription = usage_service::lock_subscription(&mut *conn, user_id).await?;
    let active: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sunshines WHERE user_id = $1 AND is_active = true")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
    usage_service::check_sunshine_limit(&subscription, active)
}

/// Create a profile and its initial personality traits.
///
/// # Process
///
/// 1. Lock the subscription and check its profile limit against active profiles
/// 2. Insert the profile, defaulting pronouns from gender
/// 3. Insert nested traits in the same database transaction
///
/// # Errors
///
/// - `PaymentRequired`: profile limit reached
pub async fn create_sunshine(
    pool: &DbPool,
    user_id: Uuid,
    request: SunshineCreate,
) -> Result<SunshineDetails, AppError> {
    let pronouns = request
        .pronouns
        .unwrap_or_else(|| request.gender.default_pronouns().to_string());

    let mut tx = pool.begin().await?;
    ensure_profile_slot(&mut tx, user_id).await?;

    let sunshine = sqlx::query_as::<_, Sunshine>(
        r#"
        INSERT INTO sunshines (
            user_id, name, birthdate, gender, pronouns, nickname,
            favorite_color, favorite_animal, favorite_food, favorite_activity,
            fears, dreams, allergies, special_needs, bedtime_routine,
            personality_summary, additional_notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&request.name)
    .bind(request.birthdate)
    .bind(request.gender.as_str())
    .bind(&pronouns)
    .bind(&request.nickname)
    .bind(&request.favorite_color)
    .bind(&request.favorite_animal)
    .bind(&request.favorite_food)
    .bind(&request.favorite_activity)
    .bind(Json(&request.fears))
    .bind(Json(&request.dreams))
    .bind(Json(&request.allergies))
    .bind(&request.special_needs)
    .bind(&request.bedtime_routine)
    .bind(&request.personality_summary)
    .bind(&request.additional_notes)
    .fetch_one(&mut *tx)
    .await?;

    let mut personality_traits = Vec::with_capacity(request.personality_traits.len());
    for t in request.personality_traits {
        let row = sqlx::query_as::<_, PersonalityTrait>(
            r#"
            INSERT INTO personality_traits (sunshine_id, trait, description, strength)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(sunshine.id)
        .bind(&t.trait_name)
        .bind(&t.description)
        .bind(t.strength)
        .fetch_one(&mut *tx)
        .await?;
        personality_traits.push(row);
    }

    tx.commit().await?;

    tracing::info!("Created sunshine profile {} for user {}", sunshine.id, user_id);

    Ok(SunshineDetails {
        sunshine,
        family_members: Vec::new(),
        comfort_items: Vec::new(),
        personality_traits,
        stories_count: 0,
    })
}

/// Apply the fields present in `request`; absent fields are left as is.
///
/// # Errors
///
/// - `SunshineNotFound`: no such profile for this user
/// - `PaymentRequired`: reactivating would exceed the profile limit
pub async fn update_sunshine(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
    request: SunshineUpdate,
) -> Result<SunshineDetails, AppError> {
    let mut tx = pool.begin().await?;

    if request.is_active == Some(true) {
        let currently_active: bool =
            sqlx::query_scalar("SELECT is_active FROM sunshines WHERE id = $1 AND user_id = $2")
                .bind(sunshine_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AppError::SunshineNotFound)?;
        if !currently_active {
            ensure_profile_slot(&mut tx, user_id).await?;
        }
    }

    let sunshine = sqlx::query_as::<_, Sunshine>(
        r#"
        UPDATE sunshines SET
            name = COALESCE($3, name),
            birthdate = COALESCE($4, birthdate),
            gender = COALESCE($5, gender),
            pronouns = COALESCE($6, pronouns),
            nickname = COALESCE($7, nickname),
            favorite_color = COALESCE($8, favorite_color),
            favorite_animal = COALESCE($9, favorite_animal),
            favorite_food = COALESCE($10, favorite_food),
            favorite_activity = COALESCE($11, favorite_activity),
            fears = COALESCE($12, fears),
            dreams = COALESCE($13, dreams),
            allergies = COALESCE($14, allergies),
            special_needs = COALESCE($15, special_needs),
            bedtime_routine = COALESCE($16, bedtime_routine),
            personality_summary = COALESCE($17, personality_summary),
            additional_notes = COALESCE($18, additional_notes),
            is_active = COALESCE($19, is_active),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(sunshine_id)
    .bind(user_id)
    .bind(&request.name)
    .bind(request.birthdate)
    .bind(request.gender.map(|g| g.as_str()))
    .bind(&request.pronouns)
    .bind(&request.nickname)
    .bind(&request.favorite_color)
    .bind(&request.favorite_animal)
    .bind(&request.favorite_food)
    .bind(&request.favorite_activity)
    .bind(request.fears.as_ref().map(Json))
    .bind(request.dreams.as_ref().map(Json))
    .bind(request.allergies.as_ref().map(Json))
    .bind(&request.special_needs)
    .bind(&request.bedtime_routine)
    .bind(&request.personality_summary)
    .bind(&request.additional_notes)
    .bind(request.is_active)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::SunshineNotFound)?;

    tx.commit().await?;

    load_details(pool, sunshine).await
}

/// Deactivate a profile, or remove it with everything attached when
/// `permanent` is set. Stories keep existing with `sunshine_id` cleared.
pub async fn delete_sunshine(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
    permanent: bool,
) -> Result<(), AppError> {
    let result = if permanent {
        sqlx::query("DELETE FROM sunshines WHERE id = $1 AND user_id = $2")
            .bind(sunshine_id)
            .bind(user_id)
            .execute(pool)
            .await?
    } else {
        sqlx::query(
            "UPDATE sunshines SET is_active = false, updated_at = NOW() WHERE id = $1 AND user_id = $2",
        )
        .bind(sunshine_id)
        .bind(user_id)
        .execute(pool)
        .await?
    };

    if result.rows_affected() == 0 {
        return Err(AppError::SunshineNotFound);
    }

    Ok(())
}

pub async fn add_family_member(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
    request: FamilyMemberCreate,
) -> Result<FamilyMember, AppError> {
    get_sunshine(pool, user_id, sunshine_id).await?;

    let member = sqlx::query_as::<_, FamilyMember>(
        r#"
        INSERT INTO family_members (
            sunshine_id, name, relation_type, relation_custom, age, description, personality_traits
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(sunshine_id)
    .bind(&request.name)
    .bind(request.relationship.as_str())
    .bind(&request.relationship_custom)
    .bind(request.age)
    .bind(&request.description)
    .bind(Json(&request.personality_traits))
    .fetch_one(pool)
    .await?;

    Ok(member)
}

pub async fn update_family_member(
    pool: &DbPool,
    user_id: Uuid,
    member_id: Uuid,
    request: FamilyMemberUpdate,
) -> Result<FamilyMember, AppError> {
    sqlx::query_as::<_, FamilyMember>(
        r#"
        UPDATE family_members fm SET
            name = COALESCE($3, fm.name),
            relation_type = COALESCE($4, fm.relation_type),
            relation_custom = COALESCE($5, fm.relation_custom),
            age = COALESCE($6, fm.age),
            description = COALESCE($7, fm.description),
            personality_traits = COALESCE($8, fm.personality_traits),
            updated_at = NOW()
        FROM sunshines s
        WHERE fm.id = $1 AND fm.sunshine_id = s.id AND s.user_id = $2
        RETURNING fm.*
        "#,
    )
    .bind(member_id)
    .bind(user_id)
    .bind(&request.name)
    .bind(request.relationship.map(|r| r.as_str()))
    .bind(&request.relationship_custom)
    .bind(request.age)
    .bind(&request.description)
    .bind(request.personality_traits.as_ref().map(Json))
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::FamilyMemberNotFound)
}

pub async fn delete_family_member(pool: &DbPool, user_id: Uuid, member_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        DELETE FROM family_members fm
        USING sunshines s
        WHERE fm.id = $1 AND fm.sunshine_id = s.id AND s.user_id = $2
        "#,
    )
    .bind(member_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::FamilyMemberNotFound);
    }

    Ok(())
}

pub async fn add_comfort_item(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
    request: ComfortItemCreate,
) -> Result<ComfortItem, AppError> {
    get_sunshine(pool, user_id, sunshine_id).await?;

    let item = sqlx::query_as::<_, ComfortItem>(
        r#"
        INSERT INTO comfort_items (sunshine_id, name, item_type, description, significance)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(sunshine_id)
    .bind(&request.name)
    .bind(&request.item_type)
    .bind(&request.description)
    .bind(&request.significance)
    .fetch_one(pool)
    .await?;

    Ok(item)
}

pub async fn update_comfort_item(
    pool: &DbPool,
    user_id: Uuid,
    item_id: Uuid,
    request: ComfortItemUpdate,
) -> Result<ComfortItem, AppError> {
    sqlx::query_as::<_, ComfortItem>(
        r#"
        UPDATE comfort_items ci SET
            name = COALESCE($3, ci.name),
            item_type = COALESCE($4, ci.item_type),
            description = COALESCE($5, ci.description),
            significance = COALESCE($6, ci.significance),
            updated_at = NOW()
        FROM sunshines s
        WHERE ci.id = $1 AND ci.sunshine_id = s.id AND s.user_id = $2
        RETURNING ci.*
        "#,
    )
    .bind(item_id)
    .bind(user_id)
    .bind(&request.name)
    .bind(&request.item_type)
    .bind(&request.description)
    .bind(&request.significance)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::ComfortItemNotFound)
}

pub async fn delete_comfort_item(pool: &DbPool, user_id: Uuid, item_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        DELETE FROM comfort_items ci
        USING sunshines s
        WHERE ci.id = $1 AND ci.sunshine_id = s.id AND s.user_id = $2
        "#,
    )
    .bind(item_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::ComfortItemNotFound);
    }

    Ok(())
}

pub async fn add_personality_trait(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
    request: PersonalityTraitCreate,
) -> Result<PersonalityTrait, AppError> {
    get_sunshine(pool, user_id, sunshine_id).await?;

    let row = sqlx::query_as::<_, PersonalityTrait>(
        r#"
        INSERT INTO personality_traits (sunshine_id, trait, description, strength)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(sunshine_id)
    .bind(&request.trait_name)
    .bind(&request.description)
    .bind(request.strength)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

pub async fn delete_personality_trait(pool: &DbPool, user_id: Uuid, trait_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        DELETE FROM personality_traits pt
        USING sunshines s
        WHERE pt.id = $1 AND pt.sunshine_id = s.id AND s.user_id = $2
        "#,
    )
    .bind(trait_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::PersonalityTraitNotFound);
    }

    Ok(())
}

pub async fn character_reference(
    pool: &DbPool,
    user_id: Uuid,
    sunshine_id: Uuid,
) -> Result<CharacterReference, AppError> {
    let details = get_sunshine_details(pool, user_id, sunshine_id).await?;
    Ok(CharacterReference::from_details(&details, Utc::now().date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;

    fn new_profile(name: &str) -> SunshineCreate {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "birthdate": "2019-04-12",
            "gender": "female",
        }))
        .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn foreign_profile_reads_as_missing(pool: DbPool) {
        let owner = fixtures::user(&pool, "owner@example.com").await;
        let other = fixtures::user(&pool, "other@example.com").await;
        let sunshine_id = fixtures::sunshine(&pool, owner, "Mia").await;

        assert!(matches!(
            get_sunshine(&pool, other, sunshine_id).await,
            Err(AppError::SunshineNotFound)
        ));
        assert!(matches!(
            update_sunshine(&pool, other, sunshine_id, SunshineUpdate::default()).await,
            Err(AppError::SunshineNotFound)
        ));
        assert!(matches!(
            delete_sunshine(&pool, other, sunshine_id, true).await,
            Err(AppError::SunshineNotFound)
        ));

        // Still there for its owner
        assert!(get_sunshine(&pool, owner, sunshine_id).await.is_ok());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn foreign_nested_records_read_as_missing(pool: DbPool) {
        let owner = fixtures::user(&pool, "owner@example.com").await;
        let other = fixtures::user(&pool, "other@example.com").await;
        let sunshine_id = fixtures::sunshine(&pool, owner, "Mia").await;

        let member = add_family_member(
            &pool,
            owner,
            sunshine_id,
            serde_json::from_value(serde_json::json!({"name": "Ana", "relationship": "mother"})).unwrap(),
        )
        .await
        .unwrap();
        let item = add_comfort_item(
            &pool,
            owner,
            sunshine_id,
            serde_json::from_value(serde_json::json!({"name": "Bun", "item_type": "stuffed_animal"})).unwrap(),
        )
        .await
        .unwrap();
        let personality = add_personality_trait(
            &pool,
            owner,
            sunshine_id,
            serde_json::from_value(serde_json::json!({"trait": "brave", "strength": 4})).unwrap(),
        )
        .await
        .unwrap();

        assert!(matches!(
            add_family_member(
                &pool,
                other,
                sunshine_id,
                serde_json::from_value(serde_json::json!({"name": "Eve", "relationship": "aunt"})).unwrap(),
            )
            .await,
            Err(AppError::SunshineNotFound)
        ));
        assert!(matches!(
            update_family_member(&pool, other, member.id, FamilyMemberUpdate::default()).await,
            Err(AppError::FamilyMemberNotFound)
        ));
        assert!(matches!(
            delete_family_member(&pool, other, member.id).await,
            Err(AppError::FamilyMemberNotFound)
        ));
        assert!(matches!(
            update_comfort_item(&pool, other, item.id, ComfortItemUpdate::default()).await,
            Err(AppError::ComfortItemNotFound)
        ));
        assert!(matches!(
            delete_comfort_item(&pool, other, item.id).await,
            Err(AppError::ComfortItemNotFound)
        ));
        assert!(matches!(
            delete_personality_trait(&pool, other, personality.id).await,
            Err(AppError::PersonalityTraitNotFound)
        ));

        let details = get_sunshine_details(&pool, owner, sunshine_id).await.unwrap();
        assert_eq!(details.family_members.len(), 1);
        assert_eq!(details.comfort_items.len(), 1);
        assert_eq!(details.personality_traits.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_stops_at_the_profile_limit(pool: DbPool) {
        let user_id = fixtures::user(&pool, "parent@example.com").await;

        create_sunshine(&pool, user_id, new_profile("Mia")).await.unwrap();
        assert!(matches!(
            create_sunshine(&pool, user_id, new_profile("Leo")).await,
            Err(AppError::PaymentRequired(_))
        ));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sunshines WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn reactivation_respects_the_profile_limit(pool: DbPool) {
        let user_id = fixtures::user(&pool, "parent@example.com").await;

        let first = create_sunshine(&pool, user_id, new_profile("Mia")).await.unwrap();
        delete_sunshine(&pool, user_id, first.sunshine.id, false).await.unwrap();
        create_sunshine(&pool, user_id, new_profile("Leo")).await.unwrap();

        let reactivate = SunshineUpdate {
            is_active: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            update_sunshine(&pool, user_id, first.sunshine.id, reactivate).await,
            Err(AppError::PaymentRequired(_))
        ));
        assert!(!get_sunshine(&pool, user_id, first.sunshine.id).await.unwrap().is_active);

        // An active profile may be "reactivated" without using a slot
        let active = list_sunshines(&pool, user_id, false).await.unwrap();
        assert_eq!(active.len(), 1);
        let update = SunshineUpdate {
            is_active: Some(true),
            nickname: Some("Lee".to_string()),
            ..Default::default()
        };
        let updated = update_sunshine(&pool, user_id, active[0].id, update).await.unwrap();
        assert_eq!(updated.sunshine.nickname.as_deref(), Some("Lee"));
    }
}
