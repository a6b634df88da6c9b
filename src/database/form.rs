use std::collections::HashSet;

use serde::Deserialize;

use crate::{
    constants::{
        MAX_LENGTH, MAX_LENGTH_EMAIL, MAX_LENGTH_FIRST_NAME, MAX_LENGTH_LAST_NAME,
        MAX_LENGTH_PASSWORD, MAX_LENGTH_SLUG, MAX_LENGTH_USERNAME, MIN_COOKING_TIME,
        RESERVED_USERNAMES,
    },
    error::{ApiError, ValidationErrors},
    schema::Id,
};

/// One ingredient line of a recipe payload. `id` references an ingredient,
/// `amount` is the per-recipe override.
#[derive(Debug, Clone, Deserialize)]
pub struct IngredientLine {
    pub id: Id,
    pub amount: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeForm {
    pub ingredients: Vec<IngredientLine>,
    pub tags: Vec<Id>,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
}

impl RecipeForm {
    /// Checks the whole payload and reports every violation at once,
    /// grouped by field.
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = ValidationErrors::new();

        if self.ingredients.is_empty() {
            errors.add("ingredients", "this field cannot be empty");
        }
        for line in &self.ingredients {
            if line.amount <= 0 {
                errors.add("ingredients", "amount must be greater than zero");
            }
        }
        let mut seen_ingredients: HashSet<Id> = HashSet::new();
        if !self
            .ingredients
            .iter()
            .all(|line| seen_ingredients.insert(line.id))
        {
            errors.add("ingredients", "ingredients must be unique");
        }

        if self.tags.is_empty() {
            errors.add("tags", "this field cannot be empty");
        }
        let mut seen_tags: HashSet<Id> = HashSet::new();
        if !self.tags.iter().all(|tag| seen_tags.insert(*tag)) {
            errors.add("tags", "tags must be unique");
        }

        if self.cooking_time < MIN_COOKING_TIME {
            errors.add("cooking_time", "cooking time must be at least one minute");
        }

        if self.name.trim().is_empty() {
            errors.add("name", "this field cannot be empty");
        } else if self.name.len() > MAX_LENGTH {
            errors.add("name", "this field is too long");
        }
        if self.image.is_empty() {
            errors.add("image", "this field cannot be empty");
        }
        if self.text.trim().is_empty() {
            errors.add("text", "this field cannot be empty");
        }

        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

fn valid_username_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '@' | '+' | '-' | '_')
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = ValidationErrors::new();

        if self.email.trim().is_empty() {
            errors.add("email", "this field cannot be empty");
        } else {
            if self.email.len() > MAX_LENGTH_EMAIL {
                errors.add("email", "this field is too long");
            }
            if !self.email.contains('@') {
                errors.add("email", "enter a valid email address");
            }
        }

        if self.username.is_empty() {
            errors.add("username", "this field cannot be empty");
        } else {
            if self.username.len() > MAX_LENGTH_USERNAME {
                errors.add("username", "this field is too long");
            }
            if !self.username.chars().all(valid_username_char) {
                errors.add("username", "username contains forbidden characters");
            }
            if RESERVED_USERNAMES.contains(&self.username.as_str()) {
                errors.add("username", "this username is reserved");
            }
        }

        if self.first_name.trim().is_empty() {
            errors.add("first_name", "this field cannot be empty");
        } else if self.first_name.len() > MAX_LENGTH_FIRST_NAME {
            errors.add("first_name", "this field is too long");
        }
        if self.last_name.trim().is_empty() {
            errors.add("last_name", "this field cannot be empty");
        } else if self.last_name.len() > MAX_LENGTH_LAST_NAME {
            errors.add("last_name", "this field is too long");
        }

        if self.password.is_empty() {
            errors.add("password", "this field cannot be empty");
        } else if self.password.len() > MAX_LENGTH_PASSWORD {
            errors.add("password", "this field is too long");
        }

        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChangeForm {
    pub current_password: String,
    pub new_password: String,
}

impl PasswordChangeForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = ValidationErrors::new();

        if self.current_password.is_empty() {
            errors.add("current_password", "this field cannot be empty");
        }
        if self.new_password.is_empty() {
            errors.add("new_password", "this field cannot be empty");
        } else if self.new_password.len() > MAX_LENGTH_PASSWORD {
            errors.add("new_password", "this field is too long");
        }

        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagForm {
    pub name: String,
    pub slug: String,
}

fn valid_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_')
}

impl TagForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = ValidationErrors::new();

        if self.name.trim().is_empty() {
            errors.add("name", "this field cannot be empty");
        } else if self.name.len() > MAX_LENGTH {
            errors.add("name", "this field is too long");
        }

        if self.slug.is_empty() {
            errors.add("slug", "this field cannot be empty");
        } else {
            if self.slug.len() > MAX_LENGTH_SLUG {
                errors.add("slug", "this field is too long");
            }
            if !self.slug.chars().all(valid_slug_char) {
                errors.add("slug", "slug contains forbidden characters");
            }
        }

        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    fn recipe_form() -> RecipeForm {
        RecipeForm {
            ingredients: vec![
                IngredientLine { id: 1, amount: 2 },
                IngredientLine { id: 2, amount: 5 },
            ],
            tags: vec![1, 2],
            name: "Pancakes".to_string(),
            image: "recipes/pancakes.png".to_string(),
            text: "Mix and fry.".to_string(),
            cooking_time: 20,
        }
    }

    fn validation_errors(result: Result<(), ApiError>) -> crate::error::ValidationErrors {
        match result {
            Err(ApiError::Validation(errors)) => errors,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_recipe_passes() {
        assert!(recipe_form().validate().is_ok());
    }

    #[test]
    fn empty_ingredients_and_tags_are_both_reported() {
        let mut form = recipe_form();
        form.ingredients.clear();
        form.tags.clear();

        let errors = validation_errors(form.validate());
        assert!(errors.field("ingredients").is_some());
        assert!(errors.field("tags").is_some());
    }

    #[test]
    fn nonpositive_amount_is_rejected() {
        let mut form = recipe_form();
        form.ingredients[0].amount = 0;
        let errors = validation_errors(form.validate());
        assert!(errors.field("ingredients").is_some());

        form.ingredients[0].amount = -3;
        let errors = validation_errors(form.validate());
        assert!(errors.field("ingredients").is_some());
    }

    #[test]
    fn duplicate_ingredient_ids_are_rejected() {
        let mut form = recipe_form();
        form.ingredients = vec![
            IngredientLine { id: 7, amount: 1 },
            IngredientLine { id: 7, amount: 4 },
        ];
        let errors = validation_errors(form.validate());
        let messages = errors.field("ingredients").unwrap();
        assert!(messages.iter().any(|m| m.contains("unique")));
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut form = recipe_form();
        form.tags = vec![3, 3];
        let errors = validation_errors(form.validate());
        assert!(errors.field("tags").is_some());
    }

    #[test]
    fn cooking_time_floor_is_one_minute() {
        let mut form = recipe_form();
        form.cooking_time = 0;
        let errors = validation_errors(form.validate());
        assert!(errors.field("cooking_time").is_some());

        form.cooking_time = 1;
        assert!(form.validate().is_ok());
    }

    #[test]
    fn all_violations_are_collected_in_one_pass() {
        let form = RecipeForm {
            ingredients: vec![IngredientLine { id: 1, amount: 0 }],
            tags: vec![],
            name: String::new(),
            image: String::new(),
            text: String::new(),
            cooking_time: 0,
        };

        let errors = validation_errors(form.validate());
        for field in ["ingredients", "tags", "name", "image", "text", "cooking_time"] {
            assert!(errors.field(field).is_some(), "missing errors for {field}");
        }
    }

    #[test]
    fn reserved_username_is_rejected() {
        let form = RegisterForm {
            email: "cook@example.com".to_string(),
            username: "me".to_string(),
            first_name: "Alex".to_string(),
            last_name: "Smith".to_string(),
            password: "secret123".to_string(),
        };
        let errors = validation_errors(form.validate());
        assert!(errors.field("username").is_some());
    }

    #[test]
    fn username_character_set_is_restricted() {
        let mut form = RegisterForm {
            email: "cook@example.com".to_string(),
            username: "alex.smith+test".to_string(),
            first_name: "Alex".to_string(),
            last_name: "Smith".to_string(),
            password: "secret123".to_string(),
        };
        assert!(form.validate().is_ok());

        form.username = "alex smith!".to_string();
        let errors = validation_errors(form.validate());
        assert!(errors.field("username").is_some());
    }

    #[test]
    fn email_must_look_like_an_address() {
        let form = RegisterForm {
            email: "not-an-address".to_string(),
            username: "alex".to_string(),
            first_name: "Alex".to_string(),
            last_name: "Smith".to_string(),
            password: "secret123".to_string(),
        };
        let errors = validation_errors(form.validate());
        assert!(errors.field("email").is_some());
    }

    #[test]
    fn tag_slug_is_url_safe() {
        let mut form = TagForm {
            name: "Breakfast".to_string(),
            slug: "breakfast".to_string(),
        };
        assert!(form.validate().is_ok());

        form.slug = "Break Fast".to_string();
        let errors = validation_errors(form.validate());
        assert!(errors.field("slug").is_some());
    }
}
