use std::collections::HashSet;

use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    authentication::{
        cryptography::generate_short_code,
        jwt::Session,
        permissions::ActionType,
    },
    constants::{SHORT_CODE_ATTEMPTS, SHORT_CODE_LENGTH},
    error::{ApiError, QueryError},
    form::RecipeForm,
    pagination::Page,
    schema::{
        Id, Recipe, RecipeDetails, RecipeFilter, RecipeIngredientRow, RecipeRow, ShortRecipe, Tag,
    },
};

use super::users::{get_user_by_id, user_row};

pub async fn get_recipe(id: Id, pool: &Pool<Postgres>) -> Result<Option<Recipe>, ApiError> {
    let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

pub async fn require_recipe(id: Id, pool: &Pool<Postgres>) -> Result<Recipe, ApiError> {
    get_recipe(id, pool)
        .await?
        .ok_or_else(|| ApiError::MissingEntity("no recipe exists with specified id".to_string()))
}

/// Fetches a recipe for mutation: the session must be the author, or an
/// admin.
pub async fn get_recipe_mut(
    id: Id,
    session: &Session,
    pool: &Pool<Postgres>,
) -> Result<Recipe, ApiError> {
    let recipe = require_recipe(id, pool).await?;
    session.authenticate(ActionType::ManageOwnRecipes)?;

    match session.authenticate(ActionType::ManageAllRecipes) {
        Ok(_) => Ok(recipe),
        Err(_) => {
            if recipe.author_id != session.user_id {
                Err(ApiError::Unauthorized(
                    "only the author can modify this recipe".to_string(),
                ))
            } else {
                Ok(recipe)
            }
        }
    }
}

/// Checks every referenced ingredient and tag id inside the transaction, so
/// a dangling reference aborts the whole composition.
async fn verify_composition_refs(
    form: &RecipeForm,
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), ApiError> {
    let ingredient_ids: Vec<Id> = form.ingredients.iter().map(|line| line.id).collect();
    let found: Vec<(Id,)> = sqlx::query_as("SELECT id FROM ingredients WHERE id = ANY($1)")
        .bind(&ingredient_ids)
        .fetch_all(&mut **tr)
        .await
        .map_err(QueryError::from)?;
    let found: HashSet<Id> = found.into_iter().map(|row| row.0).collect();
    if let Some(missing) = ingredient_ids.iter().find(|id| !found.contains(id)) {
        return Err(ApiError::MissingEntity(format!(
            "ingredient {missing} does not exist"
        )));
    }

    let found: Vec<(Id,)> = sqlx::query_as("SELECT id FROM tags WHERE id = ANY($1)")
        .bind(&form.tags)
        .fetch_all(&mut **tr)
        .await
        .map_err(QueryError::from)?;
    let found: HashSet<Id> = found.into_iter().map(|row| row.0).collect();
    if let Some(missing) = form.tags.iter().find(|id| !found.contains(id)) {
        return Err(ApiError::MissingEntity(format!(
            "tag {missing} does not exist"
        )));
    }

    Ok(())
}

/// Inserts the full ingredient/tag composition of a recipe. The unique
/// (recipe, ingredient) and (recipe, tag) constraints back up the form
/// validation, so a duplicate slipping in still fails as a field error.
async fn insert_composition(
    recipe_id: Id,
    form: &RecipeForm,
    tr: &mut Transaction<'_, Postgres>,
) -> Result<(), ApiError> {
    for line in &form.ingredients {
        sqlx::query(
            "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) VALUES ($1, $2, $3)",
        )
        .bind(recipe_id)
        .bind(line.id)
        .bind(line.amount)
        .execute(&mut **tr)
        .await
        .map_err(|e| {
            let e = QueryError::from(e);
            if e.is_unique_violation() {
                ApiError::validation("ingredients", "ingredients must be unique")
            } else {
                ApiError::Database(e)
            }
        })?;
    }

    for tag_id in &form.tags {
        sqlx::query("INSERT INTO recipe_tags (recipe_id, tag_id) VALUES ($1, $2)")
            .bind(recipe_id)
            .bind(tag_id)
            .execute(&mut **tr)
            .await
            .map_err(|e| {
                let e = QueryError::from(e);
                if e.is_unique_violation() {
                    ApiError::validation("tags", "tags must be unique")
                } else {
                    ApiError::Database(e)
                }
            })?;
    }

    Ok(())
}

/// Validates and persists a new recipe with its full composition in one
/// transaction: either the recipe and all its associations exist, or none
/// do.
pub async fn create_recipe(
    author_id: Id,
    form: &RecipeForm,
    pool: &Pool<Postgres>,
) -> Result<Recipe, ApiError> {
    form.validate()?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    verify_composition_refs(form, &mut tr).await?;

    let recipe: Recipe = sqlx::query_as(
        "
        INSERT INTO recipes (author_id, name, image, text, cooking_time)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
    ",
    )
    .bind(author_id)
    .bind(&form.name)
    .bind(&form.image)
    .bind(&form.text)
    .bind(form.cooking_time)
    .fetch_one(&mut *tr)
    .await
    .map_err(QueryError::from)?;

    insert_composition(recipe.id, form, &mut tr).await?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    Ok(recipe)
}

/// Validates and applies an update. Associations are replaced wholesale:
/// delete everything, reinsert the requested set. The post-state always
/// matches the request exactly, and the surrounding transaction keeps the
/// intermediate zero-ingredient state invisible to readers.
pub async fn update_recipe(
    recipe: &Recipe,
    form: &RecipeForm,
    pool: &Pool<Postgres>,
) -> Result<Recipe, ApiError> {
    form.validate()?;

    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    verify_composition_refs(form, &mut tr).await?;

    let updated: Recipe = sqlx::query_as(
        "
        UPDATE recipes SET name = $1, image = $2, text = $3, cooking_time = $4
        WHERE id = $5
        RETURNING *
    ",
    )
    .bind(&form.name)
    .bind(&form.image)
    .bind(&form.text)
    .bind(form.cooking_time)
    .bind(recipe.id)
    .fetch_one(&mut *tr)
    .await
    .map_err(QueryError::from)?;

    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(recipe.id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe.id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    insert_composition(recipe.id, form, &mut tr).await?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    Ok(updated)
}

pub async fn delete_recipe(recipe: &Recipe, pool: &Pool<Postgres>) -> Result<(), ApiError> {
    let mut tr = pool
        .begin()
        .await
        .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(recipe.id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(recipe.id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(recipe.id)
        .execute(&mut *tr)
        .await
        .map_err(QueryError::from)?;

    tr.commit()
        .await
        .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

    Ok(())
}

// Viewer-scoped membership predicates are inapplicable to anonymous
// viewers: the predicate is skipped, not treated as "exclude everything".
fn push_membership_predicate<'a>(
    query: &mut QueryBuilder<'a, Postgres>,
    table: &str,
    wanted: Option<bool>,
    viewer: Option<Id>,
) {
    let (wanted, viewer) = match (wanted, viewer) {
        (Some(wanted), Some(viewer)) => (wanted, viewer),
        _ => return,
    };

    if wanted {
        query.push(format!(
            " AND EXISTS (SELECT 1 FROM {table} m WHERE m.recipe_id = r.id AND m.user_id = "
        ));
    } else {
        query.push(format!(
            " AND NOT EXISTS (SELECT 1 FROM {table} m WHERE m.recipe_id = r.id AND m.user_id = "
        ));
    }
    query.push_bind(viewer);
    query.push(")");
}

pub async fn fetch_recipes(
    filter: &RecipeFilter,
    viewer: Option<Id>,
    limit: i64,
    offset: i64,
    path: &str,
    pool: &Pool<Postgres>,
) -> Result<Page<RecipeRow>, ApiError> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE",
    );

    if let Some(author) = filter.author {
        query.push(" AND r.author_id = ");
        query.push_bind(author);
    }
    if !filter.tags.is_empty() {
        query.push(
            " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id \
             WHERE rt.recipe_id = r.id AND t.slug = ANY(",
        );
        query.push_bind(filter.tags.clone());
        query.push("))");
    }
    push_membership_predicate(&mut query, "favorites", filter.is_favorited, viewer);
    push_membership_predicate(
        &mut query,
        "shopping_cart_items",
        filter.is_in_shopping_cart,
        viewer,
    );

    query.push(" ORDER BY r.id DESC LIMIT ");
    query.push_bind(limit);
    query.push(" OFFSET ");
    query.push_bind(offset);

    let rows: Vec<RecipeRow> = query
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(QueryError::from)?;

    let count = rows.first().map(|r| r.count).unwrap_or(0);
    Ok(Page::from_rows(rows, count, limit, offset, path))
}

pub async fn list_recipe_ingredients(
    recipe_id: Id,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipeIngredientRow>, ApiError> {
    let rows: Vec<RecipeIngredientRow> = sqlx::query_as(
        "
        SELECT i.id AS id, i.name AS name, i.measurement_unit AS measurement_unit, ri.amount AS amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = $1
        ORDER BY ri.id
    ",
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows)
}

pub async fn list_recipe_tags(recipe_id: Id, pool: &Pool<Postgres>) -> Result<Vec<Tag>, ApiError> {
    let rows: Vec<Tag> = sqlx::query_as(
        "
        SELECT t.id, t.name, t.slug
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = $1
        ORDER BY rt.id
    ",
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows)
}

pub async fn is_favorite(recipe_id: Id, user_id: Id, pool: &Pool<Postgres>) -> Result<bool, ApiError> {
    let row: Option<(Id,)> =
        sqlx::query_as("SELECT id FROM favorites WHERE recipe_id = $1 AND user_id = $2")
            .bind(recipe_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(QueryError::from)?;

    Ok(row.is_some())
}

pub async fn is_in_cart(recipe_id: Id, user_id: Id, pool: &Pool<Postgres>) -> Result<bool, ApiError> {
    let row: Option<(Id,)> =
        sqlx::query_as("SELECT id FROM shopping_cart_items WHERE recipe_id = $1 AND user_id = $2")
            .bind(recipe_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(QueryError::from)?;

    Ok(row.is_some())
}

/// Full read-side representation: denormalized ingredient and tag rows, the
/// embedded author, and the viewer projections. Both projections are false
/// for an anonymous viewer.
pub async fn recipe_details(
    recipe: &Recipe,
    viewer: Option<Id>,
    pool: &Pool<Postgres>,
) -> Result<RecipeDetails, ApiError> {
    let ingredients = list_recipe_ingredients(recipe.id, pool).await?;
    let tags = list_recipe_tags(recipe.id, pool).await?;

    let author = get_user_by_id(pool, recipe.author_id)
        .await?
        .ok_or_else(|| ApiError::MissingEntity("recipe author does not exist".to_string()))?;
    let author = user_row(&author, viewer, pool).await?;

    let (is_favorited, is_in_shopping_cart) = match viewer {
        Some(user_id) => (
            is_favorite(recipe.id, user_id, pool).await?,
            is_in_cart(recipe.id, user_id, pool).await?,
        ),
        None => (false, false),
    };

    Ok(RecipeDetails {
        id: recipe.id,
        tags,
        author,
        ingredients,
        is_favorited,
        is_in_shopping_cart,
        name: recipe.name.clone(),
        image: recipe.image.clone(),
        text: recipe.text.clone(),
        cooking_time: recipe.cooking_time,
    })
}

pub async fn author_recipes(
    author_id: Id,
    limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<(Vec<ShortRecipe>, i64), ApiError> {
    let recipes: Vec<Recipe> = match limit {
        Some(limit) => {
            sqlx::query_as("SELECT * FROM recipes WHERE author_id = $1 ORDER BY id DESC LIMIT $2")
                .bind(author_id)
                .bind(limit)
                .fetch_all(pool)
                .await
        }
        None => {
            sqlx::query_as("SELECT * FROM recipes WHERE author_id = $1 ORDER BY id DESC")
                .bind(author_id)
                .fetch_all(pool)
                .await
        }
    }
    .map_err(QueryError::from)?;

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipes WHERE author_id = $1")
        .bind(author_id)
        .fetch_one(pool)
        .await
        .map_err(QueryError::from)?;

    Ok((recipes.into_iter().map(ShortRecipe::from).collect(), count.0))
}

/// Returns the recipe's persistent short-link code, allocating one on first
/// request. Races between concurrent callers and code collisions are both
/// resolved against the store.
pub async fn get_recipe_link(id: Id, pool: &Pool<Postgres>) -> Result<String, ApiError> {
    let recipe = require_recipe(id, pool).await?;
    if let Some(code) = recipe.short_code {
        return Ok(code);
    }

    for _ in 0..SHORT_CODE_ATTEMPTS {
        let code = generate_short_code(SHORT_CODE_LENGTH);
        let result = sqlx::query(
            "UPDATE recipes SET short_code = $1 WHERE id = $2 AND short_code IS NULL",
        )
        .bind(&code)
        .bind(id)
        .execute(pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() > 0 => {
                log::info!("allocated short code {code} for recipe {id}");
                return Ok(code);
            }
            Ok(_) => {
                // a concurrent caller won; use their code
                let recipe = require_recipe(id, pool).await?;
                if let Some(code) = recipe.short_code {
                    return Ok(code);
                }
            }
            Err(e) => {
                let e = QueryError::from(e);
                if !e.is_unique_violation() {
                    return Err(e.into());
                }
                // code collision, roll a new one
            }
        }
    }

    Err(ApiError::Database(QueryError::new(
        "could not allocate a unique short code".to_string(),
    )))
}
