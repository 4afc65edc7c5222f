use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Largest page any list endpoint hands out.
pub const MAX_LIMIT: i64 = 100;

/// `{status, results?, data}` wrapper used by resource endpoints.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<usize>,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            results: None,
            data,
        }
    }

    pub fn with_results(data: T, results: usize) -> Self {
        Self {
            status: "success",
            results: Some(results),
            data,
        }
    }
}

/// `?limit=&offset=` (or `?limit=&page=`) query for list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub page: Option<i64>,
}
fn default_limit() -> i64 {
    MAX_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            page: None,
        }
    }
}

/// A checked `LIMIT`/`OFFSET` pair, safe to hand to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            limit: MAX_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Rejects non-positive limits and pages and negative offsets. Limits
    /// above [`MAX_LIMIT`] are capped. `page` wins over `offset`.
    pub fn window(&self) -> Result<Window, AppError> {
        let mut errors = Vec::new();
        if self.limit < 1 {
            errors.push("limit must be a positive number".to_string());
        }
        if self.offset < 0 {
            errors.push("offset must not be negative".to_string());
        }
        if self.page.is_some_and(|page| page < 1) {
            errors.push("page must be a positive number".to_string());
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let limit = self.limit.min(MAX_LIMIT);
        let offset = match self.page {
            Some(page) => (page - 1).saturating_mul(limit),
            None => self.offset,
        };
        Ok(Window { limit, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(limit: i64, offset: i64, page: Option<i64>) -> Pagination {
        Pagination {
            limit,
            offset,
            page,
        }
    }

    #[test]
    fn defaults_to_first_full_page() {
        assert_eq!(Pagination::default().window().unwrap(), Window::default());
    }

    #[test]
    fn negative_values_are_rejected() {
        let err = page(-1, -5, None).window().unwrap_err();
        match err {
            AppError::Validation(messages) => assert_eq!(
                messages,
                vec!["limit must be a positive number", "offset must not be negative"]
            ),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(page(0, 0, None).window().is_err());
        assert!(page(10, 0, Some(0)).window().is_err());
    }

    #[test]
    fn limit_is_capped_and_page_sets_offset() {
        assert_eq!(
            page(5_000, 7, None).window().unwrap(),
            Window {
                limit: MAX_LIMIT,
                offset: 7
            }
        );
        assert_eq!(
            page(10, 99, Some(3)).window().unwrap(),
            Window {
                limit: 10,
                offset: 20
            }
        );
        let huge = page(10, 0, Some(i64::MAX)).window().unwrap();
        assert_eq!(huge.offset, i64::MAX);
    }
}
