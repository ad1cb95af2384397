//! Page/limit pagination shared by notification and audit listings

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    /// Build a page request, clamping page to >= 1 and limit to 1..=100
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        let normalized = Self::new(self.page, self.limit);
        (normalized.page as usize - 1) * normalized.limit as usize
    }

    pub fn limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT) as usize
    }

    /// Slice an already-ordered collection
    pub fn apply<T: Clone>(&self, items: &[T]) -> Paginated<T> {
        let total = items.len() as u64;
        let page: Vec<T> = items
            .iter()
            .skip(self.offset())
            .take(self.limit())
            .cloned()
            .collect();
        Paginated::new(page, total, *self)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, request: Pagination) -> Self {
        let request = Pagination::new(request.page, request.limit);
        let total_pages = total.div_ceil(request.limit as u64) as u32;
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}
