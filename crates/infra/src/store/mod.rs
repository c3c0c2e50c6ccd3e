//! Persistence boundary for products and their movement ledger.
//!
//! A `LedgerStore` holds two logical collections: products keyed by code, and
//! an append-only list of committed movements. The only way a balance changes
//! is `commit_movement`, which writes the new product state and the movement
//! entry as one atomic unit guarded by the product's version.

pub mod in_memory;
pub mod postgres;
pub mod query;

use std::sync::Arc;

use thiserror::Error;

use stockledger_core::{ExpectedVersion, ProductCode};
use stockledger_inventory::{LedgerError, MovementEntry, Product, StockMoved};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{MovementFilter, MovementPage, Pagination};

/// Store operation error.
///
/// These are infrastructure errors (contention, uniqueness, backend health),
/// as opposed to domain errors (validation, invariants).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The product version moved between read and write, or a lock wait
    /// timed out. Retryable.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::ConcurrencyConflict(msg),
            other => LedgerError::Store(other.to_string()),
        }
    }
}

/// Products + movement ledger storage.
///
/// Synchronous by design so the ledger can be driven from plain threads;
/// async backends bridge onto their runtime internally.
pub trait LedgerStore: Send + Sync {
    /// Insert a freshly registered product. Fails with `Duplicate` if the
    /// code or QR code is taken.
    fn insert_product(&self, product: &Product) -> Result<(), StoreError>;

    fn load_product(&self, code: &ProductCode) -> Result<Option<Product>, StoreError>;

    fn find_by_qr(&self, qr_code: &str) -> Result<Option<Product>, StoreError>;

    /// All products, active and inactive, in no particular order.
    fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Persist a catalog edit (details, deactivation). The stored version
    /// must match `expected`; the balance is never taken from `product`.
    fn save_product(&self, product: &Product, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Atomically persist `product` (already carrying the new balance) and
    /// append `movement`, if the stored version still matches `expected`.
    ///
    /// Returns the committed entry with its ledger-wide sequence number.
    fn commit_movement(
        &self,
        product: &Product,
        expected: ExpectedVersion,
        movement: StockMoved,
    ) -> Result<MovementEntry, StoreError>;

    /// Committed movements matching `filter`, newest first.
    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        (**self).insert_product(product)
    }

    fn load_product(&self, code: &ProductCode) -> Result<Option<Product>, StoreError> {
        (**self).load_product(code)
    }

    fn find_by_qr(&self, qr_code: &str) -> Result<Option<Product>, StoreError> {
        (**self).find_by_qr(qr_code)
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products()
    }

    fn save_product(&self, product: &Product, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).save_product(product, expected)
    }

    fn commit_movement(
        &self,
        product: &Product,
        expected: ExpectedVersion,
        movement: StockMoved,
    ) -> Result<MovementEntry, StoreError> {
        (**self).commit_movement(product, expected, movement)
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        (**self).query_movements(filter, pagination)
    }
}
