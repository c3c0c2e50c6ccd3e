//! Physical inventory count workflow.
//!
//! Counts are kept in memory. Completing a count turns every counted line into
//! an `ADJUSTMENT` through the movement ledger, so the resulting balances get
//! the same atomicity and audit trail as any other movement.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{CountId, DomainError, ProductCode, Quantity, UserId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{CountItem, LedgerError, LedgerEvent, MovementEntry, MovementMeta, PhysicalCount};

use crate::error::{ServiceError, ServiceResult};
use crate::ledger::MovementLedger;
use crate::store::{LedgerStore, StoreError};

/// A completed count and the adjustments it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCompletion {
    pub count: PhysicalCount,
    pub movements: Vec<MovementEntry>,
}

#[derive(Debug)]
pub struct PhysicalCountService<S, B> {
    ledger: Arc<MovementLedger<S, B>>,
    counts: RwLock<HashMap<CountId, PhysicalCount>>,
}

impl<S, B> PhysicalCountService<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<LedgerEvent>>,
{
    pub fn new(ledger: Arc<MovementLedger<S, B>>) -> Self {
        Self {
            ledger,
            counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn plan(&self, name: &str, description: Option<String>, created_by: UserId) -> ServiceResult<PhysicalCount> {
        let count = PhysicalCount::plan(CountId::new(), name, description, created_by, Utc::now())?;
        self.write()?.insert(count.id(), count.clone());
        Ok(count)
    }

    /// Add a product line, snapshotting its current balance.
    pub fn add_product(&self, id: CountId, code: &ProductCode) -> ServiceResult<CountItem> {
        let product = self.ledger.get(code)?;
        if !product.is_active() {
            return Err(LedgerError::ProductInactive(code.clone()).into());
        }
        self.update(id, |count| {
            count.add_item(code.clone(), product.quantity_current())?;
            count.item(code).cloned().ok_or(DomainError::NotFound)
        })
    }

    pub fn start(&self, id: CountId, performed_by: UserId) -> ServiceResult<PhysicalCount> {
        self.update(id, |count| {
            count.start(performed_by, Utc::now())?;
            Ok(count.clone())
        })
    }

    pub fn record_count(
        &self,
        id: CountId,
        code: &ProductCode,
        counted: Decimal,
        note: Option<String>,
        counted_by: UserId,
    ) -> ServiceResult<CountItem> {
        let counted = Quantity::new(counted)?;
        self.update(id, |count| {
            count
                .record_count(code, counted, note, counted_by, Utc::now())
                .cloned()
        })
    }

    /// Close the count and adjust every counted product to what was found.
    ///
    /// All products are checked before the first adjustment is written; if
    /// one is missing or inactive nothing is applied and the count stays open.
    #[instrument(skip(self), fields(count = %id), err)]
    pub fn complete(&self, id: CountId, actor: UserId) -> ServiceResult<CountCompletion> {
        let mut counts = self.write()?;
        let current = counts.get(&id).ok_or(DomainError::NotFound)?;

        let mut closed = current.clone();
        let adjustments = closed.complete(Utc::now())?;

        for adjustment in &adjustments {
            if !self.ledger.get(&adjustment.product)?.is_active() {
                return Err(LedgerError::ProductInactive(adjustment.product.clone()).into());
            }
        }

        let reason = format!("Physical count: {}", closed.name());
        let document = closed.id().to_string();
        let mut movements = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            let meta = MovementMeta::new(reason.clone(), actor).with_document(document.clone());
            let outcome = self
                .ledger
                .record_adjustment(&adjustment.product, adjustment.target.value(), meta)?;
            movements.push(outcome.entry);
        }

        info!(adjusted = movements.len(), "physical count completed");
        counts.insert(id, closed.clone());
        Ok(CountCompletion {
            count: closed,
            movements,
        })
    }

    pub fn cancel(&self, id: CountId) -> ServiceResult<PhysicalCount> {
        self.update(id, |count| {
            count.cancel(Utc::now())?;
            Ok(count.clone())
        })
    }

    pub fn get(&self, id: CountId) -> ServiceResult<Option<PhysicalCount>> {
        Ok(self.read()?.get(&id).cloned())
    }

    /// All counts, most recently started first.
    pub fn list(&self) -> ServiceResult<Vec<PhysicalCount>> {
        let mut counts: Vec<_> = self.read()?.values().cloned().collect();
        counts.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        Ok(counts)
    }

    fn update<T>(
        &self,
        id: CountId,
        change: impl FnOnce(&mut PhysicalCount) -> Result<T, DomainError>,
    ) -> ServiceResult<T> {
        let mut counts = self.write()?;
        let count = counts.get_mut(&id).ok_or(DomainError::NotFound)?;
        let mut draft = count.clone();
        let result = change(&mut draft)?;
        *count = draft;
        Ok(result)
    }

    fn read(&self) -> ServiceResult<std::sync::RwLockReadGuard<'_, HashMap<CountId, PhysicalCount>>> {
        self.counts
            .read()
            .map_err(|_| ServiceError::Store(StoreError::Backend("lock poisoned".to_string())))
    }

    fn write(&self) -> ServiceResult<std::sync::RwLockWriteGuard<'_, HashMap<CountId, PhysicalCount>>> {
        self.counts
            .write()
            .map_err(|_| ServiceError::Store(StoreError::Backend("lock poisoned".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::CategoryId;
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{CountStatus, MovementKind, NewProduct, Product};

    use crate::store::InMemoryLedgerStore;

    type Service = PhysicalCountService<InMemoryLedgerStore, InMemoryEventBus<EventEnvelope<LedgerEvent>>>;

    fn code(s: &str) -> ProductCode {
        ProductCode::new(s).unwrap()
    }

    fn service() -> Service {
        let store = InMemoryLedgerStore::new();
        for (c, qty) in [("A", dec!(10)), ("B", dec!(4)), ("C", dec!(7))] {
            let mut input = NewProduct::new(code(c), c, CategoryId::new());
            input.initial_quantity = qty;
            store.insert_product(&Product::register(input, Utc::now()).unwrap()).unwrap();
        }
        PhysicalCountService::new(Arc::new(MovementLedger::new(store, InMemoryEventBus::new())))
    }

    #[test]
    fn completion_adjusts_counted_products_only() {
        let service = service();
        let user = UserId::new();
        let count = service.plan("Q4 count", None, user).unwrap();
        for c in ["A", "B", "C"] {
            service.add_product(count.id(), &code(c)).unwrap();
        }
        assert!(service.add_product(count.id(), &code("A")).is_err());

        service.start(count.id(), user).unwrap();
        let item = service
            .record_count(count.id(), &code("A"), dec!(8), Some("two damaged".into()), user)
            .unwrap();
        assert_eq!(item.difference, dec!(-2));
        service.record_count(count.id(), &code("B"), dec!(4), None, user).unwrap();

        let done = service.complete(count.id(), user).unwrap();
        assert_eq!(done.count.status(), CountStatus::Completed);
        assert_eq!(done.movements.len(), 2);
        assert!(done.movements.iter().all(|m| m.kind() == MovementKind::Adjustment));
        assert_eq!(done.movements[0].reason(), "Physical count: Q4 count");
        assert_eq!(done.movements[0].document(), Some(count.id().to_string().as_str()));
        assert_eq!(done.movements[1].quantity().value(), dec!(0));

        let ledger = &service.ledger;
        assert_eq!(ledger.get(&code("A")).unwrap().quantity_current().value(), dec!(8));
        assert_eq!(ledger.get(&code("B")).unwrap().quantity_current().value(), dec!(4));
        assert_eq!(ledger.get(&code("C")).unwrap().quantity_current().value(), dec!(7));

        assert!(service.complete(count.id(), user).is_err());
    }

    #[test]
    fn counts_cannot_be_recorded_before_start() {
        let service = service();
        let user = UserId::new();
        let count = service.plan("Spot check", None, user).unwrap();
        service.add_product(count.id(), &code("A")).unwrap();
        assert!(service.record_count(count.id(), &code("A"), dec!(1), None, user).is_err());
        assert!(service.complete(count.id(), user).is_err());

        let cancelled = service.cancel(count.id()).unwrap();
        assert_eq!(cancelled.status(), CountStatus::Cancelled);
        assert_eq!(service.get(count.id()).unwrap().unwrap().status(), CountStatus::Cancelled);
    }

    #[test]
    fn unknown_count_is_not_found() {
        let service = service();
        assert_eq!(
            service.start(CountId::new(), UserId::new()).unwrap_err(),
            ServiceError::Domain(DomainError::NotFound)
        );
    }
}
