use std::io::Read;

use sqlx::{Pool, Postgres};

use crate::{
    error::{ApiError, QueryError},
    schema::{Id, Ingredient},
};

pub async fn list_ingredients(
    search: Option<&str>,
    pool: &Pool<Postgres>,
) -> Result<Vec<Ingredient>, ApiError> {
    let rows: Vec<Ingredient> = match search {
        Some(name) => {
            sqlx::query_as("SELECT * FROM ingredients WHERE name ILIKE $1 ORDER BY name, id")
                .bind(format!("{name}%"))
                .fetch_all(pool)
                .await
        }
        None => {
            sqlx::query_as("SELECT * FROM ingredients ORDER BY name, id")
                .fetch_all(pool)
                .await
        }
    }
    .map_err(QueryError::from)?;

    Ok(rows)
}

pub async fn get_ingredient(id: Id, pool: &Pool<Postgres>) -> Result<Option<Ingredient>, ApiError> {
    let row: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(QueryError::from)?;

    Ok(row)
}

/// Seeds the ingredient table from a headerless `name,measurement_unit` CSV.
/// Existing (name, unit) pairs are left alone. Returns the number of rows
/// actually inserted.
pub async fn load_ingredients<R: Read>(reader: R, pool: &Pool<Postgres>) -> Result<u64, ApiError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(reader);

    let mut inserted = 0u64;
    let mut total = 0u64;

    for record in csv.records() {
        let record =
            record.map_err(|e| ApiError::validation("file", format!("invalid csv row: {e}")))?;
        let name = record.get(0).map(str::trim).unwrap_or("");
        let unit = record.get(1).map(str::trim).unwrap_or("");
        if name.is_empty() || unit.is_empty() {
            return Err(ApiError::validation(
                "file",
                format!("row {} must be 'name,measurement_unit'", total + 1),
            ));
        }
        total += 1;

        let result = sqlx::query(
            "INSERT INTO ingredients (name, measurement_unit) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(name)
        .bind(unit)
        .execute(pool)
        .await
        .map_err(QueryError::from)?;

        inserted += result.rows_affected();
    }

    log::info!("ingredient seed: inserted {inserted} of {total} rows");
    Ok(inserted)
}
