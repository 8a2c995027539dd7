//! User service - registration, sign-in and account lifecycle.
//!
//! Every new user gets a free subscription row in the same transaction, so
//! the rest of the service can assume exactly one subscription per user.

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::{
        subscription::SubscriptionResponse,
        user::{LoginRequest, LoginResponse, MeResponse, OAuthProfile, RefreshResponse, RegisterRequest, User},
    },
    security::{self, REFRESH_TOKEN},
    services::{oauth_service::OAuthProvider, sunshine_service, usage_service},
};

pub async fn get_user(pool: &DbPool, user_id: Uuid) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::UserNotFound)
}

async fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
        .bind(email)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

/// Local part of the email, lower-cased.
pub fn username_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// `base`, or `base_<6 hex>` when `base` is already taken.
async fn unique_username(conn: &mut PgConnection, base: &str) -> Result<String, AppError> {
    let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
        .bind(base)
        .fetch_one(&mut *conn)
        .await?;

    if !taken {
        return Ok(base.to_string());
    }

    let suffix = Uuid::new_v4().simple().to_string();
    Ok(format!("{}_{}", base, &suffix[..6]))
}

async fn create_free_subscription(conn: &mut PgConnection, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query("INSERT INTO subscriptions (user_id, tier, status) VALUES ($1, 'free', 'active')")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Concurrent registrations can pass the email check together; the
/// loser trips a unique constraint and reads like a duplicate email.
fn registration_conflict(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::InvalidRequest("Email already registered".to_string())
        }
        _ => AppError::Database(e),
    }
}

fn login_response(config: &Config, user: User) -> Result<LoginResponse, AppError> {
    let tokens = security::create_tokens(config, user.id, &user.email)?;
    Ok(LoginResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: tokens.token_type,
        user: user.into(),
    })
}

/// Register with email and password.
///
/// # Process
///
/// 1. Reject an email that is already registered
/// 2. Hash the password with Argon2id
/// 3. Insert the user and a free subscription in one transaction
/// 4. Issue an access/refresh token pair
///
/// # Errors
///
/// - `InvalidRequest`: email already registered
pub async fn register(pool: &DbPool, config: &Config, request: RegisterRequest) -> Result<LoginResponse, AppError> {
    let email = request.email.trim().to_ascii_lowercase();

    let mut tx = pool.begin().await?;

    if find_by_email(&mut tx, &email).await?.is_some() {
        return Err(AppError::InvalidRequest("Email already registered".to_string()));
    }

    let hashed_password = security::hash_password(&request.password)?;
    let username = unique_username(&mut tx, &username_from_email(&email)).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, username, full_name, hashed_password)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&username)
    .bind(request.full_name.as_deref().map(str::trim))
    .bind(&hashed_password)
    .fetch_one(&mut *tx)
    .await
    .map_err(registration_conflict)?;

    create_free_subscription(&mut tx, user.id).await?;
    tx.commit().await?;

    tracing::info!("Registered user {} ({})", user.id, user.email);
    login_response(config, user)
}

/// Email and password sign-in.
///
/// Every failure, including OAuth-only accounts, reads the same.
pub async fn authenticate(pool: &DbPool, config: &Config, request: LoginRequest) -> Result<LoginResponse, AppError> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let mut conn = pool.acquire().await?;
    let user = find_by_email(&mut conn, request.email.trim())
        .await?
        .ok_or_else(invalid)?;

    let hash = user.hashed_password.as_deref().ok_or_else(invalid)?;
    if !security::verify_password(&request.password, hash) {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::InactiveUser);
    }

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET last_login = $2 WHERE id = $1 RETURNING *",
    )
    .bind(user.id)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    login_response(config, user)
}

/// New access token for a valid refresh token.
pub async fn refresh(pool: &DbPool, config: &Config, refresh_token: &str) -> Result<RefreshResponse, AppError> {
    let claims = security::decode_token_of_type(config, refresh_token, REFRESH_TOKEN)?;
    let user = get_user(pool, claims.user_id()?).await?;
    if !user.is_active {
        return Err(AppError::InactiveUser);
    }

    Ok(RefreshResponse {
        access_token: security::create_access_token(config, user.id, &user.email)?,
        token_type: "bearer".to_string(),
    })
}

/// Whether a provider identity may be attached to the account that owns
/// its email address. Only provider-verified emails are linked.
pub fn check_email_link(provider: OAuthProvider, profile: &OAuthProfile) -> Result<(), AppError> {
    if profile.email_verified {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "An account with this email already exists and the {} email is not verified",
            provider.as_str()
        )))
    }
}

/// Resolve a verified OAuth identity to a user.
///
/// # Process
///
/// 1. Match on the provider's subject id
/// 2. Else match on email and link the provider id (and avatar), provided
///    the provider verified that email
/// 3. Else create a verified user with a free subscription
///
/// # Errors
///
/// - `Conflict`: the email belongs to an account and is unverified here
pub async fn find_or_create_oauth_user(
    pool: &DbPool,
    provider: OAuthProvider,
    profile: &OAuthProfile,
) -> Result<User, AppError> {
    let column = provider.id_column();
    let mut tx = pool.begin().await?;

    let by_provider_id =
        sqlx::query_as::<_, User>(&format!("SELECT * FROM users WHERE {column} = $1"))
            .bind(&profile.provider_user_id)
            .fetch_optional(&mut *tx)
            .await?;

    let user = if let Some(user) = by_provider_id {
        sqlx::query_as::<_, User>("UPDATE users SET last_login = NOW() WHERE id = $1 RETURNING *")
            .bind(user.id)
            .fetch_one(&mut *tx)
            .await?
    } else if let Some(user) = find_by_email(&mut tx, &profile.email).await? {
        check_email_link(provider, profile)?;
        tracing::info!("Linking {} identity to user {}", provider.as_str(), user.id);
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET {column} = $2,
                avatar_url = COALESCE(avatar_url, $3),
                is_verified = TRUE,
                last_login = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        ))
        .bind(user.id)
        .bind(&profile.provider_user_id)
        .bind(&profile.avatar_url)
        .fetch_one(&mut *tx)
        .await?
    } else {
        let username = unique_username(&mut tx, &username_from_email(&profile.email)).await?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, username, full_name, avatar_url, {column}, is_verified, last_login)
            VALUES ($1, $2, $3, $4, $5, TRUE, NOW())
            RETURNING *
            "#
        ))
        .bind(&profile.email)
        .bind(&username)
        .bind(&profile.full_name)
        .bind(&profile.avatar_url)
        .bind(&profile.provider_user_id)
        .fetch_one(&mut *tx)
        .await?;

        create_free_subscription(&mut tx, user.id).await?;
        tracing::info!("Created {} user {} ({})", provider.as_str(), user.id, user.email);
        user
    };

    tx.commit().await?;

    if !user.is_active {
        return Err(AppError::InactiveUser);
    }
    Ok(user)
}

pub async fn oauth_login(
    pool: &DbPool,
    config: &Config,
    provider: OAuthProvider,
    profile: &OAuthProfile,
) -> Result<LoginResponse, AppError> {
    let user = find_or_create_oauth_user(pool, provider, profile).await?;
    login_response(config, user)
}

/// The user with their subscription and profile summaries.
pub async fn me(pool: &DbPool, user_id: Uuid) -> Result<MeResponse, AppError> {
    let user = get_user(pool, user_id).await?;

    let subscription = match usage_service::get_subscription(pool, user_id).await {
        Ok(subscription) => {
            let can_create_story = usage_service::can_generate_story(&subscription).is_allowed();
            Some(SubscriptionResponse::new(subscription, can_create_story))
        }
        Err(AppError::SubscriptionNotFound) => None,
        Err(e) => return Err(e),
    };

    let sunshines = sunshine_service::list_sunshines(pool, user_id, false).await?;

    Ok(MeResponse {
        user: user.into(),
        subscription,
        sunshines,
    })
}

/// Delete the user; profiles, stories and the subscription cascade.
pub async fn delete_account(pool: &DbPool, user_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::UserNotFound);
    }

    tracing::info!("Deleted account {}", user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_the_local_part() {
        assert_eq!(username_from_email("Alex.Parent@Example.com"), "alex.parent");
        assert_eq!(username_from_email("no-at-sign"), "no-at-sign");
    }

    fn google_profile(email_verified: bool) -> OAuthProfile {
        OAuthProfile {
            provider_user_id: "google-sub-1".to_string(),
            email: "parent@example.com".to_string(),
            full_name: Some("Alex Parent".to_string()),
            avatar_url: None,
            email_verified,
        }
    }

    #[test]
    fn only_verified_provider_emails_link() {
        assert!(check_email_link(OAuthProvider::Google, &google_profile(true)).is_ok());
        assert!(matches!(
            check_email_link(OAuthProvider::Apple, &google_profile(false)),
            Err(AppError::Conflict(message)) if message.contains("apple")
        ));
    }

    mod db {
        use super::*;
        use crate::db::fixtures;

        fn registration(email: &str) -> RegisterRequest {
            RegisterRequest {
                email: email.to_string(),
                password: "correct horse battery".to_string(),
                full_name: None,
            }
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn concurrent_registration_with_one_email(pool: DbPool) {
            let config = Config::for_tests();

            let (first, second) = tokio::join!(
                register(&pool, &config, registration("dup@example.com")),
                register(&pool, &config, registration("DUP@example.com")),
            );

            let results = [first, second];
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.iter().any(|r| matches!(
                r,
                Err(AppError::InvalidRequest(message)) if message == "Email already registered"
            )));

            let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(users, 1);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn unverified_provider_email_is_not_linked(pool: DbPool) {
            let user_id = fixtures::user(&pool, "parent@example.com").await;

            assert!(matches!(
                find_or_create_oauth_user(&pool, OAuthProvider::Google, &google_profile(false)).await,
                Err(AppError::Conflict(_))
            ));
            assert!(get_user(&pool, user_id).await.unwrap().google_id.is_none());

            let linked = find_or_create_oauth_user(&pool, OAuthProvider::Google, &google_profile(true))
                .await
                .unwrap();
            assert_eq!(linked.id, user_id);
            assert_eq!(linked.google_id.as_deref(), Some("google-sub-1"));
            assert!(linked.is_verified);
        }
    }
}
