use sqlx::{Pool, Postgres};

use crate::{
    authentication::{
        cryptography::{hash_password, verify_password},
        jwt::generate_session_token,
    },
    error::{ApiError, QueryError, ValidationErrors},
    form::{PasswordChangeForm, RegisterForm},
    pagination::Page,
    schema::{Id, User, UserListRow, UserRow},
};

pub async fn get_user(pool: &Pool<Postgres>, username: &str) -> Result<Option<User>, ApiError> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

pub async fn get_user_by_id(pool: &Pool<Postgres>, user_id: Id) -> Result<Option<User>, ApiError> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

pub async fn get_user_by_email(pool: &Pool<Postgres>, email: &str) -> Result<Option<User>, ApiError> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

/// Creates a user from a validated registration payload. The password is
/// stored argon2-hashed. Uniqueness is pre-checked for per-field errors;
/// a concurrent insert losing the race still surfaces as the same 400.
pub async fn register_user(form: &RegisterForm, pool: &Pool<Postgres>) -> Result<User, ApiError> {
    form.validate()?;

    let mut errors = ValidationErrors::new();
    if get_user_by_email(pool, &form.email).await?.is_some() {
        errors.add("email", "an account with this email already exists");
    }
    if get_user(pool, &form.username).await?.is_some() {
        errors.add("username", "an account with this username already exists");
    }
    errors.into_result()?;

    let password = hash_password(&form.password)
        .map_err(|_| QueryError::new("failed to hash password".to_string()))?;

    let user: User = sqlx::query_as(
        "
        INSERT INTO users (email, username, first_name, last_name, password)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *;
    ",
    )
    .bind(&form.email)
    .bind(&form.username)
    .bind(&form.first_name)
    .bind(&form.last_name)
    .bind(&password)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        let e = QueryError::from(e);
        if e.is_unique_violation() {
            ApiError::validation("username", "an account with this username or email already exists")
        } else {
            ApiError::Database(e)
        }
    })?;

    log::info!("registered user {} ({})", user.username, user.id);
    Ok(user)
}

pub async fn login_user(
    email: &str,
    password: &str,
    pool: &Pool<Postgres>,
) -> Result<String, ApiError> {
    let user = get_user_by_email(pool, email).await?;
    let user = match user {
        Some(user) => user,
        None => return Err(ApiError::validation("password", "invalid email or password")),
    };

    let authenticated = verify_password(password, &user.password).unwrap_or(false);
    if !authenticated {
        log::warn!("failed login attempt for {}", user.username);
        return Err(ApiError::validation("password", "invalid email or password"));
    }

    Ok(generate_session_token(&user))
}

pub async fn set_password(
    user: &User,
    form: &PasswordChangeForm,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    form.validate()?;

    let authenticated = verify_password(&form.current_password, &user.password).unwrap_or(false);
    if !authenticated {
        return Err(ApiError::validation(
            "current_password",
            "current password is wrong",
        ));
    }

    let password = hash_password(&form.new_password)
        .map_err(|_| QueryError::new("failed to hash password".to_string()))?;

    sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
        .bind(&password)
        .bind(user.id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(())
}

/// Replaces or clears the user's avatar reference. The image bytes live in
/// the asset store; only the returned reference is persisted here.
pub async fn set_avatar(
    user_id: Id,
    avatar: Option<&str>,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    sqlx::query("UPDATE users SET avatar = $1 WHERE id = $2")
        .bind(avatar)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(())
}

pub async fn is_subscribed(
    viewer: Option<Id>,
    author_id: Id,
    pool: &Pool<Postgres>,
) -> Result<bool, ApiError> {
    let viewer = match viewer {
        Some(viewer) => viewer,
        None => return Ok(false),
    };

    let row: Option<(Id,)> = sqlx::query_as(
        "SELECT id FROM subscriptions WHERE user_id = $1 AND subscribed_to = $2",
    )
    .bind(viewer)
    .bind(author_id)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(row.is_some())
}

pub async fn user_row(
    user: &User,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<UserRow, ApiError> {
    let subscribed = is_subscribed(viewer, user.id, pool).await?;
    Ok(UserRow::from_user(user, subscribed))
}

pub async fn fetch_users(
    viewer: Option<Id>,
    limit: i64,
    offset: i64,
    path: &str,
    pool: &Pool<Postgres>,
) -> Result<Page<UserListRow>, ApiError> {
    let rows: Vec<UserListRow> = sqlx::query_as(
        "
        SELECT u.id, u.email, u.username, u.first_name, u.last_name, u.avatar,
            EXISTS(
                SELECT 1 FROM subscriptions s
                WHERE s.user_id = $1 AND s.subscribed_to = u.id
            ) AS is_subscribed,
            COUNT(*) OVER() AS count
        FROM users u
        ORDER BY u.id
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(viewer)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let count = rows.first().map(|r| r.count).unwrap_or(0);
    Ok(Page::from_rows(rows, count, limit, offset, path))
}
