//! Read-side reports over the ledger: movement history, dashboard, low stock.
//!
//! Figures are derived from current balances on every call and never cached.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, ProductCode};
use stockledger_inventory::{MovementEntry, MovementKind, Product, StockSummary};

use crate::config::LedgerConfig;
use crate::error::ServiceResult;
use crate::store::{LedgerStore, MovementFilter, MovementPage, Pagination};

/// History request. `page` is 1-based; page size comes from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementQuery {
    pub product: Option<ProductCode>,
    pub kind: Option<MovementKind>,
    pub page: u32,
}

impl Default for MovementQuery {
    fn default() -> Self {
        Self {
            product: None,
            kind: None,
            page: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub active_products: usize,
    pub low_stock_count: usize,
    pub total_stock_value: Decimal,
    /// First few low-stock products, by name.
    pub low_stock_preview: Vec<Product>,
    /// Latest movements across all products.
    pub recent_movements: Vec<MovementEntry>,
}

#[derive(Debug)]
pub struct InventoryReports<S> {
    store: S,
    low_stock_preview: usize,
    recent_movements: usize,
    page_size: u32,
}

impl<S> InventoryReports<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            low_stock_preview: config.low_stock_preview,
            recent_movements: config.recent_movements,
            page_size: config.page_size,
        }
    }

    pub fn movement_history(&self, query: &MovementQuery) -> ServiceResult<MovementPage> {
        let filter = MovementFilter {
            product: query.product.clone(),
            kind: query.kind,
        };
        Ok(self
            .store
            .query_movements(&filter, Pagination::new(query.page, self.page_size))?)
    }

    /// Latest `limit` movements of one product, newest first.
    pub fn product_history(&self, code: &ProductCode, limit: u32) -> ServiceResult<Vec<MovementEntry>> {
        if self.store.load_product(code)?.is_none() {
            return Err(DomainError::NotFound.into());
        }
        let page = self
            .store
            .query_movements(&MovementFilter::for_product(code.clone()), Pagination::new(1, limit))?;
        Ok(page.entries)
    }

    /// Active low-stock products ordered by name.
    pub fn low_stock(&self) -> ServiceResult<Vec<Product>> {
        Ok(low_stock_by_name(self.store.list_products()?))
    }

    /// Counts, value and the low-stock preview all come from one product
    /// snapshot.
    pub fn dashboard(&self) -> ServiceResult<DashboardSummary> {
        let products = self.store.list_products()?;
        let summary = StockSummary::from_products(&products);

        let mut low_stock_preview = low_stock_by_name(products);
        low_stock_preview.truncate(self.low_stock_preview);

        let recent_movements = if self.recent_movements == 0 {
            Vec::new()
        } else {
            let per_page = u32::try_from(self.recent_movements).unwrap_or(Pagination::MAX_PER_PAGE);
            self.store
                .query_movements(&MovementFilter::default(), Pagination::new(1, per_page))?
                .entries
        };

        Ok(DashboardSummary {
            active_products: summary.active_products,
            low_stock_count: summary.low_stock_count,
            total_stock_value: summary.total_stock_value,
            low_stock_preview,
            recent_movements,
        })
    }
}

fn low_stock_by_name(products: Vec<Product>) -> Vec<Product> {
    let mut low: Vec<_> = products
        .into_iter()
        .filter(|p| p.is_active() && p.is_low_stock())
        .collect();
    low.sort_by(|a, b| {
        a.name()
            .to_lowercase()
            .cmp(&b.name().to_lowercase())
            .then_with(|| a.code().cmp(b.code()))
    });
    low
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_core::{CategoryId, UserId};
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{MovementMeta, NewProduct};

    use crate::error::ServiceError;
    use crate::ledger::MovementLedger;
    use crate::store::InMemoryLedgerStore;

    fn code(s: &str) -> ProductCode {
        ProductCode::new(s).unwrap()
    }

    fn seed(store: &InMemoryLedgerStore, c: &str, name: &str, qty: Decimal, min: Decimal, cost: Decimal) {
        let mut input = NewProduct::new(code(c), name, CategoryId::new());
        input.initial_quantity = qty;
        input.minimum_quantity = min;
        input.cost_price = cost;
        store.insert_product(&Product::register(input, Utc::now()).unwrap()).unwrap();
    }

    fn fixture() -> (Arc<InMemoryLedgerStore>, InventoryReports<Arc<InMemoryLedgerStore>>) {
        let config = LedgerConfig::default().with_page_size(2);
        let store = Arc::new(InMemoryLedgerStore::from_config(&config));
        seed(&store, "A", "Washer", dec!(100), dec!(10), dec!(0.05));
        seed(&store, "B", "bolt", dec!(3), dec!(10), dec!(0.25));
        seed(&store, "C", "Anchor", dec!(2), dec!(2), dec!(1.50));

        let reports = InventoryReports::new(store.clone(), &config);
        (store, reports)
    }

    #[test]
    fn dashboard_sums_active_products() {
        let (_store, reports) = fixture();
        let dashboard = reports.dashboard().unwrap();
        assert_eq!(dashboard.active_products, 3);
        assert_eq!(dashboard.low_stock_count, 2);
        assert_eq!(dashboard.total_stock_value, dec!(8.75));
        let names: Vec<_> = dashboard.low_stock_preview.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["Anchor", "bolt"]);
        assert!(dashboard.recent_movements.is_empty());
    }

    #[test]
    fn history_pages_newest_first() {
        let (store, reports) = fixture();
        let ledger = MovementLedger::from_config(store, InMemoryEventBus::new(), &LedgerConfig::default());
        for reason in ["one", "two", "three"] {
            ledger
                .record_exit(&code("A"), dec!(1), MovementMeta::new(reason, UserId::new()))
                .unwrap();
        }
        ledger
            .record_entry(&code("B"), dec!(8), MovementMeta::new("restock", UserId::new()))
            .unwrap();

        let first = reports.movement_history(&MovementQuery::default()).unwrap();
        assert_eq!(first.total, 4);
        assert!(first.has_more);
        assert_eq!(first.entries[0].reason(), "restock");

        let exits = reports
            .movement_history(&MovementQuery {
                product: Some(code("A")),
                kind: Some(MovementKind::Exit),
                page: 2,
            })
            .unwrap();
        assert_eq!(exits.entries.len(), 1);
        assert_eq!(exits.entries[0].reason(), "one");
        assert!(!exits.has_more);

        let latest = reports.product_history(&code("A"), 2).unwrap();
        let reasons: Vec<_> = latest.iter().map(|e| e.reason()).collect();
        assert_eq!(reasons, ["three", "two"]);

        assert_eq!(
            reports.product_history(&code("Z"), 5).unwrap_err(),
            ServiceError::Domain(DomainError::NotFound)
        );

        let dashboard = reports.dashboard().unwrap();
        assert_eq!(dashboard.recent_movements.len(), 4);
        assert_eq!(dashboard.low_stock_count, 1);
        assert_eq!(dashboard.low_stock_preview.len(), dashboard.low_stock_count);
    }

    #[test]
    fn dashboard_preview_agrees_with_its_counts() {
        let config = LedgerConfig::default();
        let store = Arc::new(InMemoryLedgerStore::new());
        for (c, qty) in [("L1", dec!(1)), ("L2", dec!(0)), ("OK", dec!(50))] {
            seed(&store, c, c, qty, dec!(5), dec!(1));
        }
        let reports = InventoryReports::new(store.clone(), &config);
        let ledger = MovementLedger::from_config(store, InMemoryEventBus::new(), &config);

        let before = reports.dashboard().unwrap();
        assert_eq!(before.low_stock_count, 2);
        assert_eq!(before.low_stock_preview.len(), before.low_stock_count);

        ledger
            .record_adjustment(&code("OK"), dec!(5), MovementMeta::new("recount", UserId::new()))
            .unwrap();
        let after = reports.dashboard().unwrap();
        assert_eq!(after.low_stock_count, 3);
        let codes: Vec<_> = after.low_stock_preview.iter().map(|p| p.code().as_str()).collect();
        assert_eq!(codes, ["L1", "L2", "OK"]);
        assert_eq!(after.total_stock_value, dec!(6));
    }
}
