//! Common types used across the platform

use serde::{Deserialize, Serialize};

/// Default page size for list endpoints
pub const DEFAULT_PER_PAGE: u32 = 25;

/// Largest page a client may request
pub const MAX_PER_PAGE: u32 = 100;

/// Pagination parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pagination {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE),
        }
        .normalized()
    }

    /// Clamp page to >= 1 and per_page to 1..=MAX_PER_PAGE
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.normalized().per_page)
    }

    pub fn offset(&self) -> i64 {
        let p = self.normalized();
        i64::from(p.page - 1) * i64::from(p.per_page)
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, pagination: Pagination, total_items: i64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(pagination, total_items),
        }
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: Pagination, total_items: i64) -> Self {
        let p = pagination.normalized();
        let total_items = total_items.max(0) as u64;
        let per_page = u64::from(p.per_page);
        let total_pages = ((total_items + per_page - 1) / per_page) as u32;
        Self {
            page: p.page,
            per_page: p.per_page,
            total_items,
            total_pages,
        }
    }
}

/// Sort direction for list queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_limit() {
        let p = Pagination::new(Some(3), Some(20));
        assert_eq!(p.limit(), 20);
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn test_pagination_is_clamped() {
        let p = Pagination::new(Some(0), Some(10_000));
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, MAX_PER_PAGE);
        assert_eq!(p.offset(), 0);

        let p = Pagination { page: 2, per_page: 0 };
        assert_eq!(p.limit(), 1);
        assert_eq!(p.offset(), 1);
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let meta = PaginationMeta::new(Pagination::new(Some(1), Some(25)), 51);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(meta.total_items, 51);

        let empty = PaginationMeta::new(Pagination::default(), 0);
        assert_eq!(empty.total_pages, 0);
    }
}
