//! Ledger decision logic: validate a movement against a product's current
//! state and compute the exact before/after balances.
//!
//! Pure and deterministic. Atomic persistence (and retry under contention)
//! is the infrastructure layer's concern; this module only answers "given
//! this balance, what movement would this command produce?".

use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::{Aggregate, MovementId, ProductCode, Quantity};

use crate::movement::{MovementCommand, MovementMeta, StockChange, StockMoved};
use crate::product::Product;

pub const REASON_MAX_LEN: usize = 200;
pub const DOCUMENT_MAX_LEN: usize = 100;

/// Ledger failure. Every variant is an expected, reportable outcome; none of
/// them leaves a partial write behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("product not found: {0}")]
    ProductNotFound(ProductCode),

    #[error("product is inactive: {0}")]
    ProductInactive(ProductCode),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Quantity,
        available: Quantity,
    },

    #[error("movement reason cannot be empty")]
    EmptyReason,

    #[error("invalid movement metadata: {0}")]
    InvalidMetadata(String),

    /// Transient: the balance kept changing underneath us. Safe to retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("ledger store failure: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}

impl Aggregate for Product {
    type Command = MovementCommand;
    type Event = StockMoved;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        self.set_balance(event.quantity_after, event.occurred_at);
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.decide(command).map(|moved| vec![moved])
    }
}

impl Product {
    /// Validate `command` and produce the single movement it implies.
    pub fn decide(&self, command: &MovementCommand) -> Result<StockMoved, LedgerError> {
        if &command.product != self.code() {
            return Err(LedgerError::ProductNotFound(command.product.clone()));
        }
        if !self.is_active() {
            return Err(LedgerError::ProductInactive(self.code().clone()));
        }

        let before = self.quantity_current();
        let (quantity, after) = match command.change {
            StockChange::Entry { quantity } => decide_entry(before, quantity)?,
            StockChange::Exit { quantity } => decide_exit(before, quantity)?,
            StockChange::Adjustment { target } => decide_adjustment(before, target)?,
        };

        let meta = validate_meta(&command.meta)?;

        Ok(StockMoved {
            movement_id: MovementId::new(),
            product: self.code().clone(),
            kind: command.change.kind(),
            quantity,
            quantity_before: before,
            quantity_after: after,
            reason: meta.reason,
            document: meta.document,
            note: meta.note,
            actor: meta.actor,
            occurred_at: meta.occurred_at,
        })
    }
}

fn decide_entry(before: Quantity, quantity: Decimal) -> Result<(Quantity, Quantity), LedgerError> {
    let quantity = positive(quantity)?;
    let after = before.checked_add(quantity).ok_or_else(|| {
        LedgerError::InvalidQuantity(format!(
            "entry of {quantity} would exceed the maximum balance (current {before})"
        ))
    })?;
    Ok((quantity, after))
}

fn decide_exit(before: Quantity, quantity: Decimal) -> Result<(Quantity, Quantity), LedgerError> {
    let quantity = positive(quantity)?;
    let after = before
        .checked_sub(quantity)
        .ok_or(LedgerError::InsufficientStock {
            requested: quantity,
            available: before,
        })?;
    Ok((quantity, after))
}

fn decide_adjustment(before: Quantity, target: Decimal) -> Result<(Quantity, Quantity), LedgerError> {
    let target = Quantity::new(target)
        .map_err(|e| LedgerError::InvalidQuantity(format!("adjustment target: {e}")))?;
    Ok((target.abs_diff(before), target))
}

fn positive(quantity: Decimal) -> Result<Quantity, LedgerError> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::InvalidQuantity(format!(
            "quantity must be greater than zero (got {quantity})"
        )));
    }
    Quantity::new(quantity).map_err(|e| LedgerError::InvalidQuantity(e.to_string()))
}

fn validate_meta(meta: &MovementMeta) -> Result<MovementMeta, LedgerError> {
    let reason = meta.reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::EmptyReason);
    }
    if reason.chars().count() > REASON_MAX_LEN {
        return Err(LedgerError::InvalidMetadata(format!(
            "reason longer than {REASON_MAX_LEN} characters"
        )));
    }

    let document = meta
        .document
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    if let Some(doc) = &document {
        if doc.chars().count() > DOCUMENT_MAX_LEN {
            return Err(LedgerError::InvalidMetadata(format!(
                "document longer than {DOCUMENT_MAX_LEN} characters"
            )));
        }
    }

    Ok(MovementMeta {
        reason: reason.to_string(),
        document,
        note: meta
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        actor: meta.actor,
        occurred_at: meta.occurred_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_core::{AggregateRoot, CategoryId, UserId};

    use crate::movement::MovementKind;
    use crate::product::NewProduct;

    fn code() -> ProductCode {
        ProductCode::new("SKU-1").unwrap()
    }

    fn product_with(current: Decimal, minimum: Decimal) -> Product {
        let mut input = NewProduct::new(code(), "Widget", CategoryId::new());
        input.initial_quantity = current;
        input.minimum_quantity = minimum;
        Product::register(input, Utc::now()).unwrap()
    }

    fn meta() -> MovementMeta {
        MovementMeta::new("restock", UserId::new())
    }

    /// Decide + apply, the way the store-backed ledger does.
    fn execute(product: &mut Product, command: MovementCommand) -> Result<StockMoved, LedgerError> {
        let events = product.handle(&command)?;
        for ev in &events {
            product.apply(ev);
        }
        Ok(events.into_iter().next().unwrap())
    }

    #[test]
    fn entry_adds_quantity() {
        let mut p = product_with(dec!(10), dec!(5));
        let moved = execute(&mut p, MovementCommand::entry(code(), dec!(2.5), meta())).unwrap();

        assert_eq!(moved.kind, MovementKind::Entry);
        assert_eq!(moved.quantity_before.value(), dec!(10));
        assert_eq!(moved.quantity_after.value(), dec!(12.5));
        assert_eq!(p.quantity_current().value(), dec!(12.5));
        assert_eq!(p.version(), 2);
    }

    #[test]
    fn entry_and_exit_reject_non_positive_quantities() {
        let p = product_with(dec!(10), dec!(5));
        for q in [dec!(0), dec!(-1)] {
            assert!(matches!(
                p.decide(&MovementCommand::entry(code(), q, meta())),
                Err(LedgerError::InvalidQuantity(_))
            ));
            assert!(matches!(
                p.decide(&MovementCommand::exit(code(), q, meta())),
                Err(LedgerError::InvalidQuantity(_))
            ));
        }
    }

    #[test]
    fn quantities_with_excess_precision_are_invalid() {
        let p = product_with(dec!(10), dec!(5));
        assert!(matches!(
            p.decide(&MovementCommand::entry(code(), dec!(0.001), meta())),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn exit_scenario_from_ten_with_minimum_five() {
        let mut p = product_with(dec!(10), dec!(5));

        execute(&mut p, MovementCommand::exit(code(), dec!(3), meta())).unwrap();
        assert_eq!(p.quantity_current().value(), dec!(7));
        assert!(!p.is_low_stock());

        execute(&mut p, MovementCommand::exit(code(), dec!(5), meta())).unwrap();
        assert_eq!(p.quantity_current().value(), dec!(2));
        assert!(p.is_low_stock());

        let err = execute(&mut p, MovementCommand::exit(code(), dec!(10), meta())).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                requested: Quantity::new(dec!(10)).unwrap(),
                available: Quantity::new(dec!(2)).unwrap(),
            }
        );
        assert_eq!(p.quantity_current().value(), dec!(2));
    }

    #[test]
    fn exit_of_entire_balance_is_allowed() {
        let mut p = product_with(dec!(4), dec!(0));
        execute(&mut p, MovementCommand::exit(code(), dec!(4), meta())).unwrap();
        assert!(p.quantity_current().is_zero());
    }

    #[test]
    fn adjustment_to_zero_logs_magnitude() {
        let mut p = product_with(dec!(2), dec!(5));
        let moved = execute(&mut p, MovementCommand::adjustment(code(), dec!(0), meta())).unwrap();

        assert_eq!(moved.kind, MovementKind::Adjustment);
        assert_eq!(moved.quantity.value(), dec!(2));
        assert_eq!(moved.quantity_after.value(), dec!(0));
        assert!(p.quantity_current().is_zero());
    }

    #[test]
    fn adjustment_to_same_balance_still_produces_a_movement() {
        let mut p = product_with(dec!(8), dec!(1));
        let moved = execute(&mut p, MovementCommand::adjustment(code(), dec!(8), meta())).unwrap();
        assert!(moved.quantity.is_zero());
        assert_eq!(moved.quantity_before, moved.quantity_after);
        assert_eq!(p.version(), 2);
    }

    #[test]
    fn adjustment_rejects_negative_target() {
        let p = product_with(dec!(8), dec!(1));
        assert!(matches!(
            p.decide(&MovementCommand::adjustment(code(), dec!(-1), meta())),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn blank_reason_is_rejected() {
        let p = product_with(dec!(8), dec!(1));
        let meta = MovementMeta::new("   ", UserId::new());
        assert_eq!(
            p.decide(&MovementCommand::entry(code(), dec!(1), meta)),
            Err(LedgerError::EmptyReason)
        );
    }

    #[test]
    fn metadata_is_trimmed() {
        let p = product_with(dec!(8), dec!(1));
        let meta = MovementMeta::new("  invoice  ", UserId::new())
            .with_document("  NF-123 ")
            .with_note("   ");
        let moved = p.decide(&MovementCommand::entry(code(), dec!(1), meta)).unwrap();
        assert_eq!(moved.reason, "invoice");
        assert_eq!(moved.document.as_deref(), Some("NF-123"));
        assert_eq!(moved.note, None);
    }

    #[test]
    fn inactive_product_refuses_movements() {
        let mut p = product_with(dec!(8), dec!(1));
        p.deactivate(Utc::now()).unwrap();
        assert_eq!(
            p.decide(&MovementCommand::entry(code(), dec!(1), meta())),
            Err(LedgerError::ProductInactive(code()))
        );
    }

    #[test]
    fn command_for_another_product_is_not_found() {
        let p = product_with(dec!(8), dec!(1));
        let other = ProductCode::new("OTHER").unwrap();
        assert_eq!(
            p.decide(&MovementCommand::entry(other.clone(), dec!(1), meta())),
            Err(LedgerError::ProductNotFound(other))
        );
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::ConcurrencyConflict("x".into()).is_retryable());
        assert!(!LedgerError::EmptyReason.is_retryable());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn cents() -> impl Strategy<Value = Decimal> {
            (0i64..1_000_000).prop_map(|c| Decimal::new(c, 2))
        }

        proptest! {
            /// Property: after == before + signed delta, for every kind.
            #[test]
            fn before_after_invariant_holds(start in cents(), amount in cents(), kind in 0u8..3) {
                let mut p = product_with(start, Decimal::ZERO);
                let command = match kind {
                    0 => MovementCommand::entry(code(), amount, meta()),
                    1 => MovementCommand::exit(code(), amount, meta()),
                    _ => MovementCommand::adjustment(code(), amount, meta()),
                };
                if let Ok(moved) = execute(&mut p, command) {
                    prop_assert_eq!(
                        moved.quantity_after.value(),
                        moved.quantity_before.value() + moved.signed_delta()
                    );
                    prop_assert_eq!(p.quantity_current(), moved.quantity_after);
                }
            }

            /// Property: exits never drive the balance negative and failures leave it untouched.
            #[test]
            fn exit_never_negative(start in cents(), amount in cents()) {
                let mut p = product_with(start, Decimal::ZERO);
                let before = p.quantity_current();
                match execute(&mut p, MovementCommand::exit(code(), amount, meta())) {
                    Ok(moved) => prop_assert!(moved.quantity_after.value() >= Decimal::ZERO),
                    Err(_) => prop_assert_eq!(p.quantity_current(), before),
                }
            }

            /// Property: adjustments land exactly on the target.
            #[test]
            fn adjustment_lands_on_target(start in cents(), target in cents()) {
                let mut p = product_with(start, Decimal::ZERO);
                let moved = execute(&mut p, MovementCommand::adjustment(code(), target, meta())).unwrap();
                prop_assert_eq!(p.quantity_current().value(), target);
                prop_assert_eq!(moved.quantity.value(), (target - start).abs());
            }
        }
    }
}
