//! Inventory domain: products, the stock movement ledger, physical counts.
//!
//! This crate contains business rules only, implemented as deterministic
//! domain logic (no IO, no storage). The infrastructure layer wraps it with
//! atomic persistence.

pub mod count;
pub mod ledger;
pub mod metrics;
pub mod movement;
pub mod product;

pub use count::{CountAdjustment, CountItem, CountStatus, PhysicalCount};
pub use ledger::LedgerError;
pub use metrics::{StockSummary, low_stock, stock_value, total_stock_value};
pub use movement::{
    LedgerEvent, MovementCommand, MovementEntry, MovementKind, MovementMeta, StockChange, StockMoved,
};
pub use product::{NewProduct, Product, ProductDetails, ProductRecord};
