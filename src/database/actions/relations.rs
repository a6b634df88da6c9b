use sqlx::{Pool, Postgres};

use crate::{
    error::{ApiError, QueryError},
    pagination::Page,
    schema::{Id, ShortRecipe, SubscribedAuthor, UserListRow},
};

use super::{recipes::author_recipes, recipes::get_recipe, users::get_user_by_id};

/// The two user↔recipe join rows share one toggle contract; the variant
/// picks the table. Subscriptions get their own pair below because of the
/// self-subscription rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeRelation {
    Favorite,
    ShoppingCart,
}

impl RecipeRelation {
    fn table(self) -> &'static str {
        match self {
            RecipeRelation::Favorite => "favorites",
            RecipeRelation::ShoppingCart => "shopping_cart_items",
        }
    }

    fn label(self) -> &'static str {
        match self {
            RecipeRelation::Favorite => "favorites",
            RecipeRelation::ShoppingCart => "the shopping cart",
        }
    }
}

/// Adds the join row. The unique constraint is the real race guard: a
/// concurrent duplicate insert loses on `rows_affected`, never on a
/// read-then-write check.
pub async fn add_recipe_relation(
    relation: RecipeRelation,
    user_id: Id,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<ShortRecipe, ApiError> {
    let recipe = get_recipe(recipe_id, pool)
        .await?
        .ok_or_else(|| ApiError::MissingEntity("no recipe exists with specified id".to_string()))?;

    let result = sqlx::query(&format!(
        "INSERT INTO {} (user_id, recipe_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        relation.table()
    ))
    .bind(user_id)
    .bind(recipe_id)
    .execute(pool)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::AlreadyExists(format!(
            "recipe is already in {}",
            relation.label()
        )));
    }

    Ok(ShortRecipe::from(recipe))
}

pub async fn remove_recipe_relation(
    relation: RecipeRelation,
    user_id: Id,
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<(), ApiError> {
    get_recipe(recipe_id, pool)
        .await?
        .ok_or_else(|| ApiError::MissingEntity("no recipe exists with specified id".to_string()))?;

    let result = sqlx::query(&format!(
        "DELETE FROM {} WHERE user_id = $1 AND recipe_id = $2",
        relation.table()
    ))
    .bind(user_id)
    .bind(recipe_id)
    .execute(pool)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!(
            "recipe is not in {}",
            relation.label()
        )));
    }

    Ok(())
}

pub async fn subscribe(user_id: Id, target_id: Id, pool: &Pool<Postgres>) -> Result<(), ApiError> {
    if user_id == target_id {
        return Err(ApiError::validation(
            "subscribed_to",
            "cannot subscribe to yourself",
        ));
    }

    let target = get_user_by_id(pool, target_id)
        .await?
        .ok_or_else(|| ApiError::MissingEntity("no user exists with specified id".to_string()))?;

    let result = sqlx::query(
        "INSERT INTO subscriptions (user_id, subscribed_to) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(target_id)
    .execute(pool)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::AlreadyExists(format!(
            "already subscribed to {}",
            target.username
        )));
    }

    Ok(())
}

pub async fn unsubscribe(user_id: Id, target_id: Id, pool: &Pool<Postgres>) -> Result<(), ApiError> {
    let target = get_user_by_id(pool, target_id)
        .await?
        .ok_or_else(|| ApiError::MissingEntity("no user exists with specified id".to_string()))?;

    let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND subscribed_to = $2")
        .bind(user_id)
        .bind(target_id)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!(
            "not subscribed to {}",
            target.username
        )));
    }

    Ok(())
}

/// The viewer's subscribed authors, each carrying their latest recipes
/// (optionally truncated to `recipes_limit`) and total recipe count.
pub async fn list_subscriptions(
    user_id: Id,
    recipes_limit: Option<i64>,
    limit: i64,
    offset: i64,
    path: &str,
    pool: &Pool<Postgres>,
) -> Result<Page<SubscribedAuthor>, ApiError> {
    let rows: Vec<UserListRow> = sqlx::query_as(
        "
        SELECT u.id, u.email, u.username, u.first_name, u.last_name, u.avatar,
            TRUE AS is_subscribed,
            COUNT(*) OVER() AS count
        FROM subscriptions s
        INNER JOIN users u ON u.id = s.subscribed_to
        WHERE s.user_id = $1
        ORDER BY u.id
        LIMIT $2 OFFSET $3
    ",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    let count = rows.first().map(|r| r.count).unwrap_or(0);

    let mut authors = Vec::with_capacity(rows.len());
    for row in rows {
        let (recipes, recipes_count) = author_recipes(row.id, recipes_limit, pool).await?;
        authors.push(SubscribedAuthor {
            email: row.email,
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            is_subscribed: row.is_subscribed,
            avatar: row.avatar,
            recipes,
            recipes_count,
        });
    }

    Ok(Page::from_rows(authors, count, limit, offset, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn relation_variants_map_to_their_tables() {
        assert_eq!(RecipeRelation::Favorite.table(), "favorites");
        assert_eq!(RecipeRelation::ShoppingCart.table(), "shopping_cart_items");
        assert_ne!(
            RecipeRelation::Favorite.table(),
            RecipeRelation::ShoppingCart.table()
        );
    }

    #[tokio::test]
    async fn self_subscription_fails_before_touching_the_store() {
        // lazy pool: no connection is ever established
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unreachable")
            .unwrap();

        match subscribe(3, 3, &pool).await {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.field("subscribed_to").is_some());
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
