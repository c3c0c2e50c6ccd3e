//! Movement history queries.

use serde::{Deserialize, Serialize};

use stockledger_core::ProductCode;
use stockledger_inventory::{MovementEntry, MovementKind};

/// Page request. `page` is 1-based; both bounds are clamped on every
/// construction path, deserialization included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PageParams")]
pub struct Pagination {
    page: u32,
    per_page: u32,
}

#[derive(Deserialize)]
struct PageParams {
    page: u32,
    per_page: u32,
}

impl From<PageParams> for Pagination {
    fn from(raw: PageParams) -> Self {
        Pagination::new(raw.page, raw.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 30,
        }
    }
}

impl Pagination {
    pub const MAX_PER_PAGE: u32 = 1000;

    /// Clamp to `page >= 1` and `1 <= per_page <= MAX_PER_PAGE`.
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product: Option<ProductCode>,
    pub kind: Option<MovementKind>,
}

impl MovementFilter {
    pub fn for_product(product: ProductCode) -> Self {
        Self {
            product: Some(product),
            kind: None,
        }
    }

    pub fn matches(&self, entry: &MovementEntry) -> bool {
        self.product.as_ref().is_none_or(|p| p == entry.product())
            && self.kind.is_none_or(|k| k == entry.kind())
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub entries: Vec<MovementEntry>,
    /// Matching entries across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl MovementPage {
    /// Slice an already-sorted (newest first) list of matches.
    pub fn from_sorted(matches: Vec<MovementEntry>, pagination: Pagination) -> Self {
        let total = matches.len() as u64;
        let offset = pagination.offset().min(total) as usize;
        let entries: Vec<_> = matches
            .into_iter()
            .skip(offset)
            .take(pagination.limit() as usize)
            .collect();
        let has_more = total > pagination.offset() + pagination.limit();
        Self {
            entries,
            total,
            pagination,
            has_more,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination::new(0, 0);
        assert_eq!((p.page(), p.per_page()), (1, 1));
        assert_eq!(Pagination::new(3, 5_000).per_page(), Pagination::MAX_PER_PAGE);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
    }

    #[test]
    fn deserialized_pagination_is_clamped_too() {
        let p: Pagination = serde_json::from_str(r#"{"page":0,"per_page":0}"#).unwrap();
        assert_eq!(p, Pagination::new(1, 1));

        let page = MovementPage::from_sorted(Vec::new(), p);
        assert!(page.is_empty());
        assert!(!page.has_more);
    }
}
