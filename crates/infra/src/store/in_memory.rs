use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use stockledger_core::{AggregateRoot, ExpectedVersion, ProductCode};
use stockledger_inventory::{MovementEntry, Product, ProductRecord, StockMoved};

use crate::config::LedgerConfig;

use super::query::{MovementFilter, MovementPage, Pagination};
use super::{LedgerStore, StoreError};

/// A product and its own slice of the ledger, guarded together so a reader
/// never sees a balance without the entry that produced it.
#[derive(Debug)]
struct ProductSlot {
    product: Product,
    movements: Vec<MovementEntry>,
}

/// In-memory ledger store.
///
/// Each product lives in its own `Mutex`; the outer map lock is only taken
/// for writing when a product is inserted. Commits against different products
/// never contend. Intended for tests/dev and single-process deployments.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    slots: RwLock<HashMap<ProductCode, Arc<Mutex<ProductSlot>>>>,
    sequence: AtomicU64,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    /// Bound how long a commit waits for a product slot before reporting a
    /// retryable `Concurrency` error.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            lock_timeout,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout)
    }

    /// Highest sequence number handed out so far.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn slot(&self, code: &ProductCode) -> Option<Arc<Mutex<ProductSlot>>> {
        self.slots.read().get(code).cloned()
    }

    fn all_slots(&self) -> Vec<Arc<Mutex<ProductSlot>>> {
        self.slots.read().values().cloned().collect()
    }

    fn lock<'a>(&self, slot: &'a Mutex<ProductSlot>) -> Result<MutexGuard<'a, ProductSlot>, StoreError> {
        slot.try_lock_for(self.lock_timeout).ok_or_else(|| {
            StoreError::Concurrency(format!(
                "timed out after {:?} waiting for product lock",
                self.lock_timeout
            ))
        })
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut slots = self.slots.write();

        if slots.contains_key(product.code()) {
            return Err(StoreError::Duplicate(format!("product code {}", product.code())));
        }
        for slot in slots.values() {
            let existing = self.lock(slot)?;
            if existing.product.qr_code() == product.qr_code() {
                return Err(StoreError::Duplicate(format!("qr code {}", product.qr_code())));
            }
        }

        slots.insert(
            product.code().clone(),
            Arc::new(Mutex::new(ProductSlot {
                product: product.clone(),
                movements: Vec::new(),
            })),
        );
        Ok(())
    }

    fn load_product(&self, code: &ProductCode) -> Result<Option<Product>, StoreError> {
        match self.slot(code) {
            Some(slot) => Ok(Some(self.lock(&slot)?.product.clone())),
            None => Ok(None),
        }
    }

    fn find_by_qr(&self, qr_code: &str) -> Result<Option<Product>, StoreError> {
        for slot in self.all_slots() {
            let slot = self.lock(&slot)?;
            if slot.product.qr_code() == qr_code {
                return Ok(Some(slot.product.clone()));
            }
        }
        Ok(None)
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.all_slots()
            .iter()
            .map(|slot| Ok(self.lock(slot)?.product.clone()))
            .collect()
    }

    fn save_product(&self, product: &Product, expected: ExpectedVersion) -> Result<(), StoreError> {
        let slot = self
            .slot(product.code())
            .ok_or_else(|| StoreError::NotFound(format!("product {}", product.code())))?;
        let mut slot = self.lock(&slot)?;

        let current = slot.product.version();
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "product {}: expected {expected:?}, found {current}",
                product.code()
            )));
        }

        // Balance only moves through commit_movement.
        let record = ProductRecord {
            quantity_current: slot.product.quantity_current(),
            ..product.to_record()
        };
        slot.product = Product::from(record);
        Ok(())
    }

    fn commit_movement(
        &self,
        product: &Product,
        expected: ExpectedVersion,
        movement: StockMoved,
    ) -> Result<MovementEntry, StoreError> {
        if &movement.product != product.code() || movement.quantity_after != product.quantity_current() {
            return Err(StoreError::Backend(format!(
                "movement {} does not describe the product state being saved",
                movement.movement_id
            )));
        }

        let slot = self
            .slot(product.code())
            .ok_or_else(|| StoreError::NotFound(format!("product {}", product.code())))?;
        let mut slot = self.lock(&slot)?;

        let current = slot.product.version();
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "product {}: expected {expected:?}, found {current}",
                product.code()
            )));
        }
        if movement.quantity_before != slot.product.quantity_current() {
            return Err(StoreError::Backend(format!(
                "movement {} starts from {} but product {} holds {}",
                movement.movement_id,
                movement.quantity_before,
                product.code(),
                slot.product.quantity_current()
            )));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = MovementEntry::committed(sequence, movement);
        slot.movements.push(entry.clone());
        slot.product = product.clone();
        Ok(entry)
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let slots = match &filter.product {
            Some(code) => self.slot(code).into_iter().collect(),
            None => self.all_slots(),
        };

        let mut matches = Vec::new();
        for slot in slots {
            let slot = self.lock(&slot)?;
            matches.extend(slot.movements.iter().filter(|e| filter.matches(e)).cloned());
        }
        matches.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));

        Ok(MovementPage::from_sorted(matches, pagination))
    }
}
