//! Read-only derivations over product state.
//!
//! Nothing here is cached: every figure is recomputed from the balances it is
//! given, using the same fixed-point arithmetic as the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::product::Product;

pub fn low_stock(product: &Product) -> bool {
    product.is_low_stock()
}

pub fn stock_value(product: &Product) -> Decimal {
    product.stock_value()
}

/// Sum of `quantity_current * cost_price` over active products.
pub fn total_stock_value<'a>(products: impl IntoIterator<Item = &'a Product>) -> Decimal {
    products
        .into_iter()
        .filter(|p| p.is_active())
        .map(Product::stock_value)
        .sum()
}

/// Headline figures over a set of products (inactive ones are ignored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub active_products: usize,
    pub low_stock_count: usize,
    pub total_stock_value: Decimal,
}

impl StockSummary {
    pub fn from_products<'a>(products: impl IntoIterator<Item = &'a Product>) -> Self {
        let mut summary = StockSummary {
            active_products: 0,
            low_stock_count: 0,
            total_stock_value: Decimal::ZERO,
        };
        for p in products.into_iter().filter(|p| p.is_active()) {
            summary.active_products += 1;
            if p.is_low_stock() {
                summary.low_stock_count += 1;
            }
            summary.total_stock_value += p.stock_value();
        }
        summary
    }
}
