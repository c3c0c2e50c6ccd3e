//! Movement ledger: the only write path for product balances.
//!
//! ## Execution Flow
//!
//! ```text
//! MovementCommand
//!   ↓
//! 1. Load the product (current balance + version)
//!   ↓
//! 2. Decide (pure: validate, compute before/after)
//!   ↓
//! 3. Apply to a local copy (balance, version + 1)
//!   ↓
//! 4. commit_movement(product, Exact(version), movement)
//!      ├─ Ok → publish LedgerEvent, return outcome
//!      └─ Concurrency → back off, go to 1 (bounded attempts)
//! ```
//!
//! Validation failures happen in step 2, strictly before any write. A commit
//! either lands both the balance and the entry or neither, so a failure at any
//! step leaves stored state untouched.
//!
//! Two movements on the same product cannot both commit from the same
//! `quantity_before`: the loser's version check fails and it re-reads. Movements
//! on different products never touch the same version and run in parallel.

use std::thread;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use stockledger_core::{Aggregate, ExpectedVersion, ProductCode};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{
    LedgerError, LedgerEvent, MovementCommand, MovementEntry, MovementMeta, Product,
};

use crate::config::{LedgerConfig, RetryPolicy};
use crate::store::LedgerStore;

/// Stream type used on published envelopes.
pub const PRODUCT_STREAM: &str = "inventory.product";

/// Result of a committed movement: the product as stored and its new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementOutcome {
    pub product: Product,
    pub entry: MovementEntry,
}

#[derive(Debug)]
pub struct MovementLedger<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> MovementLedger<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(store: S, bus: B, config: &LedgerConfig) -> Self {
        Self::new(store, bus).with_retry(config.retry)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> MovementLedger<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<LedgerEvent>>,
{
    /// Current product state.
    pub fn get(&self, code: &ProductCode) -> Result<Product, LedgerError> {
        self.store
            .load_product(code)?
            .ok_or_else(|| LedgerError::ProductNotFound(code.clone()))
    }

    pub fn record_entry(
        &self,
        code: &ProductCode,
        quantity: Decimal,
        meta: MovementMeta,
    ) -> Result<MovementOutcome, LedgerError> {
        self.record(MovementCommand::entry(code.clone(), quantity, meta))
    }

    pub fn record_exit(
        &self,
        code: &ProductCode,
        quantity: Decimal,
        meta: MovementMeta,
    ) -> Result<MovementOutcome, LedgerError> {
        self.record(MovementCommand::exit(code.clone(), quantity, meta))
    }

    pub fn record_adjustment(
        &self,
        code: &ProductCode,
        target: Decimal,
        meta: MovementMeta,
    ) -> Result<MovementOutcome, LedgerError> {
        self.record(MovementCommand::adjustment(code.clone(), target, meta))
    }

    /// Validate and atomically commit one movement.
    ///
    /// `occurred_at` is stamped on every attempt, after the product is read,
    /// so a product's entries are timestamped in commit order.
    #[instrument(
        skip(self, command),
        fields(code = %command.product, kind = %command.change.kind()),
        err
    )]
    pub fn record(&self, mut command: MovementCommand) -> Result<MovementOutcome, LedgerError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_conflict = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(&mut command) {
                Ok(outcome) => {
                    info!(
                        sequence = outcome.entry.sequence(),
                        before = %outcome.entry.quantity_before(),
                        after = %outcome.entry.quantity_after(),
                        attempt,
                        "movement committed"
                    );
                    self.publish(&outcome.product, &outcome.entry);
                    return Ok(outcome);
                }
                Err(LedgerError::ConcurrencyConflict(msg)) => {
                    warn!(attempt, max_attempts, conflict = %msg, "movement lost a version race");
                    last_conflict = msg;
                    if attempt < max_attempts {
                        thread::sleep(self.retry.delay_after(attempt));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::ConcurrencyConflict(format!(
            "product {} still contended after {max_attempts} attempts: {last_conflict}",
            command.product
        )))
    }

    /// One load, decide, commit cycle. Lock timeouts and stale versions come
    /// back as `ConcurrencyConflict`.
    fn attempt(&self, command: &mut MovementCommand) -> Result<MovementOutcome, LedgerError> {
        let mut product = self.get(&command.product)?;
        let expected = ExpectedVersion::of(&product);

        command.meta.occurred_at = Utc::now();
        let moved = product.decide(command)?;
        product.apply(&moved);

        let entry = self.store.commit_movement(&product, expected, moved)?;
        Ok(MovementOutcome { product, entry })
    }

    /// Publish strictly after commit. The movement is durable either way, so a
    /// bus failure is logged rather than returned.
    fn publish(&self, product: &Product, entry: &MovementEntry) {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            product.code().as_str(),
            PRODUCT_STREAM,
            entry.sequence(),
            LedgerEvent::StockMoved {
                entry: entry.clone(),
                quantity_minimum: product.quantity_minimum(),
            },
        );
        match self.bus.publish(envelope) {
            Ok(()) => debug!(sequence = entry.sequence(), "movement published"),
            Err(err) => warn!(
                sequence = entry.sequence(),
                error = ?err,
                "movement committed but could not be published"
            ),
        }
    }
}
