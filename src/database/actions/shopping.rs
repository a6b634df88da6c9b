use std::collections::HashMap;

use sqlx::{Pool, Postgres};
use warp::Reply;

use crate::{
    constants::SHOPPING_LIST_FILENAME,
    error::{ApiError, QueryError},
    schema::{CartLine, Id, ShoppingListLine, User},
};

/// Every recipe-ingredient row of every recipe in the user's cart, joined
/// with the ingredient's display data. Unaggregated; summing happens in
/// [`aggregate_amounts`].
pub async fn fetch_cart_ingredients(
    user_id: Id,
    pool: &Pool<Postgres>,
) -> Result<Vec<CartLine>, ApiError> {
    let rows: Vec<CartLine> = sqlx::query_as(
        "
        SELECT i.id AS ingredient_id, i.name AS name,
            i.measurement_unit AS measurement_unit, ri.amount AS amount
        FROM shopping_cart_items sc
        INNER JOIN recipe_ingredients ri ON ri.recipe_id = sc.recipe_id
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE sc.user_id = $1
    ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(QueryError::from)?;

    Ok(rows)
}

/// Single-pass grouped sum, keyed by the ingredient's id. Two ingredients
/// sharing a display name but not an id stay on separate lines. Output is
/// sorted by (name, id) so repeated calls against the same data render
/// identically.
pub fn aggregate_amounts(lines: Vec<CartLine>) -> Vec<ShoppingListLine> {
    let mut totals: HashMap<Id, ShoppingListLine> = HashMap::new();
    for line in lines {
        match totals.get_mut(&line.ingredient_id) {
            Some(entry) => entry.total_amount += i64::from(line.amount),
            None => {
                totals.insert(
                    line.ingredient_id,
                    ShoppingListLine {
                        ingredient_id: line.ingredient_id,
                        name: line.name,
                        measurement_unit: line.measurement_unit,
                        total_amount: i64::from(line.amount),
                    },
                );
            }
        }
    }

    let mut rows: Vec<ShoppingListLine> = totals.into_values().collect();
    rows.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.ingredient_id.cmp(&b.ingredient_id))
    });
    rows
}

pub fn shopping_list_text(user: &User, rows: &[ShoppingListLine]) -> String {
    let mut text = format!("Shopping list for: {}\n\n", user.full_name());
    text.push_str(
        &rows
            .iter()
            .map(|row| {
                format!(
                    "- {} ({}) - {}",
                    row.name, row.measurement_unit, row.total_amount
                )
            })
            .collect::<Vec<String>>()
            .join("\n"),
    );
    text
}

/// Aggregates the user's cart into the downloadable report. An empty cart
/// is a client error, not an empty file.
pub async fn download_shopping_list(user: &User, pool: &Pool<Postgres>) -> Result<String, ApiError> {
    let lines = fetch_cart_ingredients(user.id, pool).await?;
    if lines.is_empty() {
        return Err(ApiError::validation("shopping_cart", "shopping cart is empty"));
    }

    Ok(shopping_list_text(user, &aggregate_amounts(lines)))
}

/// Wraps the rendered report as a `text/plain` attachment reply.
pub fn shopping_list_reply(text: String) -> impl Reply {
    let reply = warp::reply::with_header(text, "Content-Type", "text/plain; charset=utf-8");
    warp::reply::with_header(
        reply,
        "Content-Disposition",
        format!("attachment; filename=\"{SHOPPING_LIST_FILENAME}\""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UserRole;

    fn line(ingredient_id: Id, name: &str, unit: &str, amount: i32) -> CartLine {
        CartLine {
            ingredient_id,
            name: name.to_string(),
            measurement_unit: unit.to_string(),
            amount,
        }
    }

    fn user() -> User {
        User {
            id: 1,
            email: "cook@example.com".to_string(),
            username: "cook".to_string(),
            first_name: "Alex".to_string(),
            last_name: "Smith".to_string(),
            password: "hash".to_string(),
            avatar: None,
            role: UserRole::User,
        }
    }

    #[test]
    fn same_ingredient_across_recipes_is_summed() {
        let rows = aggregate_amounts(vec![
            line(1, "flour", "g", 3),
            line(1, "flour", "g", 4),
        ]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_amount, 7);
    }

    #[test]
    fn same_name_different_id_stays_separate() {
        // e.g. "pepper" the vegetable vs "pepper" the spice
        let rows = aggregate_amounts(vec![
            line(5, "pepper", "pcs", 2),
            line(9, "pepper", "g", 10),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ingredient_id, 5);
        assert_eq!(rows[0].total_amount, 2);
        assert_eq!(rows[1].ingredient_id, 9);
        assert_eq!(rows[1].total_amount, 10);
    }

    #[test]
    fn output_order_is_deterministic() {
        let a = aggregate_amounts(vec![
            line(3, "salt", "g", 1),
            line(1, "flour", "g", 2),
            line(2, "milk", "ml", 200),
        ]);
        let b = aggregate_amounts(vec![
            line(2, "milk", "ml", 200),
            line(3, "salt", "g", 1),
            line(1, "flour", "g", 2),
        ]);

        assert_eq!(a, b);
        let names: Vec<&str> = a.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["flour", "milk", "salt"]);
    }

    #[test]
    fn report_lists_one_line_per_ingredient() {
        let rows = aggregate_amounts(vec![
            line(1, "flour", "g", 300),
            line(2, "milk", "ml", 200),
            line(1, "flour", "g", 100),
        ]);
        let text = shopping_list_text(&user(), &rows);

        assert!(text.starts_with("Shopping list for: Alex Smith\n\n"));
        assert!(text.contains("- flour (g) - 400"));
        assert!(text.contains("- milk (ml) - 200"));
    }

    #[test]
    fn empty_aggregation_renders_just_the_header() {
        let text = shopping_list_text(&user(), &[]);
        assert_eq!(text, "Shopping list for: Alex Smith\n\n");
    }
}
