use sqlx::{Pool, Postgres};

use crate::{
    authentication::{jwt::Session, permissions::ActionType},
    error::{ApiError, QueryError},
    form::TagForm,
    schema::{Id, Tag},
};

/// Tags are privileged reference data; only admins create them.
pub async fn create_tag(
    form: &TagForm,
    session: &Session,
    pool: &Pool<Postgres>,
) -> Result<Tag, ApiError> {
    session.authenticate(ActionType::ManageTags)?;
    form.validate()?;

    let tag: Option<Tag> = sqlx::query_as(
        "INSERT INTO tags (name, slug) VALUES ($1, $2) ON CONFLICT DO NOTHING RETURNING *",
    )
    .bind(&form.name)
    .bind(&form.slug)
    .fetch_optional(pool)
    .await
    .map_err(QueryError::from)?;

    tag.ok_or_else(|| {
        ApiError::AlreadyExists("a tag with this name or slug already exists".to_string())
    })
}

pub async fn get_tag(id: Id, pool: &Pool<Postgres>) -> Result<Option<Tag>, ApiError> {
    let tag: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(tag)
}

pub async fn find_tag_by_slug(slug: &str, pool: &Pool<Postgres>) -> Result<Option<Tag>, ApiError> {
    let tag: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(tag)
}

pub async fn list_tags(pool: &Pool<Postgres>) -> Result<Vec<Tag>, ApiError> {
    let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(list)
}
