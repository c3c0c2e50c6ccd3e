//! Movement commands, decided movements and committed ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{MovementId, ProductCode, Quantity, UserId};
use stockledger_events::Event;

/// Movement kind as stored in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Entry,
    Exit,
    Adjustment,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Entry => "ENTRY",
            MovementKind::Exit => "EXIT",
            MovementKind::Adjustment => "ADJUSTMENT",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY" => Ok(MovementKind::Entry),
            "EXIT" => Ok(MovementKind::Exit),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            other => Err(format!("unknown movement kind: {other}")),
        }
    }
}

/// Requested balance change.
///
/// Entry and exit carry the magnitude to add/remove; adjustment carries the
/// absolute target balance. Values are raw decimals because validating them
/// is part of the ledger's job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockChange {
    Entry { quantity: Decimal },
    Exit { quantity: Decimal },
    Adjustment { target: Decimal },
}

impl StockChange {
    pub fn kind(&self) -> MovementKind {
        match self {
            StockChange::Entry { .. } => MovementKind::Entry,
            StockChange::Exit { .. } => MovementKind::Exit,
            StockChange::Adjustment { .. } => MovementKind::Adjustment,
        }
    }
}

/// Caller-supplied movement metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementMeta {
    pub reason: String,
    pub document: Option<String>,
    pub note: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl MovementMeta {
    pub fn new(reason: impl Into<String>, actor: UserId) -> Self {
        Self {
            reason: reason.into(),
            document: None,
            note: None,
            actor,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Command: record one movement against one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCommand {
    pub product: ProductCode,
    pub change: StockChange,
    pub meta: MovementMeta,
}

impl MovementCommand {
    pub fn entry(product: ProductCode, quantity: Decimal, meta: MovementMeta) -> Self {
        Self {
            product,
            change: StockChange::Entry { quantity },
            meta,
        }
    }

    pub fn exit(product: ProductCode, quantity: Decimal, meta: MovementMeta) -> Self {
        Self {
            product,
            change: StockChange::Exit { quantity },
            meta,
        }
    }

    pub fn adjustment(product: ProductCode, target: Decimal, meta: MovementMeta) -> Self {
        Self {
            product,
            change: StockChange::Adjustment { target },
            meta,
        }
    }
}

/// Event: a validated movement, ready to be committed.
///
/// `quantity` is always the magnitude of the change; for adjustments it is
/// `|quantity_after - quantity_before|` and may be zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub movement_id: MovementId,
    pub product: ProductCode,
    pub kind: MovementKind,
    pub quantity: Quantity,
    pub quantity_before: Quantity,
    pub quantity_after: Quantity,
    pub reason: String,
    pub document: Option<String>,
    pub note: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl StockMoved {
    /// `+quantity` for entries, `-quantity` for exits, `after - before` for adjustments.
    pub fn signed_delta(&self) -> Decimal {
        match self.kind {
            MovementKind::Entry => self.quantity.value(),
            MovementKind::Exit => -self.quantity.value(),
            MovementKind::Adjustment => self.quantity_after.value() - self.quantity_before.value(),
        }
    }
}

/// Immutable, committed ledger entry.
///
/// `sequence` is assigned by the store at commit time and is strictly
/// increasing across the whole ledger, which breaks timestamp ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    sequence: u64,
    #[serde(flatten)]
    movement: StockMoved,
}

impl MovementEntry {
    /// Wrap a decided movement with its commit sequence. Stores call this.
    pub fn committed(sequence: u64, movement: StockMoved) -> Self {
        Self { sequence, movement }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn movement(&self) -> &StockMoved {
        &self.movement
    }

    pub fn id(&self) -> MovementId {
        self.movement.movement_id
    }

    pub fn product(&self) -> &ProductCode {
        &self.movement.product
    }

    pub fn kind(&self) -> MovementKind {
        self.movement.kind
    }

    pub fn quantity(&self) -> Quantity {
        self.movement.quantity
    }

    pub fn quantity_before(&self) -> Quantity {
        self.movement.quantity_before
    }

    pub fn quantity_after(&self) -> Quantity {
        self.movement.quantity_after
    }

    pub fn reason(&self) -> &str {
        &self.movement.reason
    }

    pub fn document(&self) -> Option<&str> {
        self.movement.document.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.movement.note.as_deref()
    }

    pub fn actor(&self) -> UserId {
        self.movement.actor
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.movement.occurred_at
    }

    pub fn signed_delta(&self) -> Decimal {
        self.movement.signed_delta()
    }

    /// Chronological ordering key: timestamp, then commit sequence.
    pub fn ordering_key(&self) -> (DateTime<Utc>, u64) {
        (self.movement.occurred_at, self.sequence)
    }
}

/// Published after a movement commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    StockMoved {
        entry: MovementEntry,
        /// Product minimum at commit time, so consumers can detect low-stock
        /// transitions without reading the store.
        quantity_minimum: Quantity,
    },
}

impl LedgerEvent {
    pub fn entry(&self) -> &MovementEntry {
        match self {
            LedgerEvent::StockMoved { entry, .. } => entry,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::StockMoved { .. } => "stock.moved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.entry().occurred_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn moved(kind: MovementKind, quantity: Decimal, before: Decimal, after: Decimal) -> StockMoved {
        StockMoved {
            movement_id: MovementId::new(),
            product: ProductCode::new("P").unwrap(),
            kind,
            quantity: Quantity::new(quantity).unwrap(),
            quantity_before: Quantity::new(before).unwrap(),
            quantity_after: Quantity::new(after).unwrap(),
            reason: "r".to_string(),
            document: None,
            note: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn signed_delta_per_kind() {
        assert_eq!(moved(MovementKind::Entry, dec!(3), dec!(1), dec!(4)).signed_delta(), dec!(3));
        assert_eq!(moved(MovementKind::Exit, dec!(3), dec!(4), dec!(1)).signed_delta(), dec!(-3));
        assert_eq!(
            moved(MovementKind::Adjustment, dec!(2), dec!(2), dec!(0)).signed_delta(),
            dec!(-2)
        );
    }

    #[test]
    fn kind_uses_ledger_names_on_the_wire() {
        assert_eq!(serde_json::to_string(&MovementKind::Adjustment).unwrap(), "\"ADJUSTMENT\"");
        assert_eq!("EXIT".parse::<MovementKind>().unwrap(), MovementKind::Exit);
        assert!("SAIDA".parse::<MovementKind>().is_err());
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = MovementEntry::committed(9, moved(MovementKind::Entry, dec!(1), dec!(0), dec!(1)));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["sequence"], 9);
        assert_eq!(json["kind"], "ENTRY");
        let back: MovementEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
