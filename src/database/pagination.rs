use serde::Serialize;

use crate::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

#[derive(Serialize, Debug)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn from_rows(rows: Vec<T>, count: i64, limit: i64, offset: i64, path: &str) -> Self {
        let next = if offset + limit < count {
            Some(format!("{path}?limit={limit}&offset={}", offset + limit))
        } else {
            None
        };
        let previous = if offset > 0 {
            let prev = (offset - limit).max(0);
            Some(format!("{path}?limit={limit}&offset={prev}"))
        } else {
            None
        };

        Self {
            count,
            next,
            previous,
            results: rows,
        }
    }

    pub fn empty() -> Self {
        Self {
            count: 0,
            next: None,
            previous: None,
            results: vec![],
        }
    }
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_has_no_previous() {
        let page = Page::from_rows(vec![1, 2, 3], 7, 3, 0, "/api/recipes");
        assert_eq!(page.count, 7);
        assert_eq!(page.previous, None);
        assert_eq!(
            page.next.as_deref(),
            Some("/api/recipes?limit=3&offset=3")
        );
    }

    #[test]
    fn last_page_has_no_next() {
        let page = Page::from_rows(vec![7], 7, 3, 6, "/api/recipes");
        assert_eq!(page.next, None);
        assert_eq!(
            page.previous.as_deref(),
            Some("/api/recipes?limit=3&offset=3")
        );
    }

    #[test]
    fn previous_offset_never_goes_negative() {
        let page = Page::from_rows(vec![2, 3], 4, 3, 2, "/api/users");
        assert_eq!(
            page.previous.as_deref(),
            Some("/api/users?limit=3&offset=0")
        );
    }

    #[test]
    fn empty_page_is_inert() {
        let page: Page<i32> = Page::empty();
        assert_eq!(page.count, 0);
        assert!(page.results.is_empty());
        assert_eq!(page.next, None);
        assert_eq!(page.previous, None);
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(1000)), MAX_PAGE_LIMIT);
        assert_eq!(clamp_limit(Some(25)), 25);
    }
}
