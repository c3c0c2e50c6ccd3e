//! Physical inventory counts.
//!
//! A count snapshots the system balance of a set of products, collects what
//! was actually on the shelf, and on completion yields the adjustments that
//! bring the ledger in line with the shelf.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{CountId, DomainError, DomainResult, ProductCode, Quantity, UserId};

/// Count lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl CountStatus {
    pub fn is_open(self) -> bool {
        matches!(self, CountStatus::Planned | CountStatus::InProgress)
    }
}

/// One product line of a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountItem {
    pub product: ProductCode,
    pub system_quantity: Quantity,
    pub counted_quantity: Option<Quantity>,
    /// `counted - system`; zero until counted.
    pub difference: Decimal,
    pub note: Option<String>,
    pub counted_at: Option<DateTime<Utc>>,
    pub counted_by: Option<UserId>,
}

impl CountItem {
    pub fn is_counted(&self) -> bool {
        self.counted_quantity.is_some()
    }
}

/// Adjustment implied by a completed count line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAdjustment {
    pub product: ProductCode,
    pub target: Quantity,
    pub difference: Decimal,
}

/// Physical inventory count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCount {
    id: CountId,
    name: String,
    description: Option<String>,
    status: CountStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    created_by: UserId,
    performed_by: Option<UserId>,
    items: Vec<CountItem>,
}

impl PhysicalCount {
    pub fn plan(
        id: CountId,
        name: &str,
        description: Option<String>,
        created_by: UserId,
        starts_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("count name cannot be empty"));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            description: description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            status: CountStatus::Planned,
            started_at: starts_at,
            finished_at: None,
            created_by,
            performed_by: None,
            items: Vec::new(),
        })
    }

    /// Add a product line with its current system balance.
    pub fn add_item(&mut self, product: ProductCode, system_quantity: Quantity) -> DomainResult<()> {
        self.ensure_open()?;
        if self.item(&product).is_some() {
            return Err(DomainError::conflict(format!("product {product} already in count")));
        }
        self.items.push(CountItem {
            product,
            system_quantity,
            counted_quantity: None,
            difference: Decimal::ZERO,
            note: None,
            counted_at: None,
            counted_by: None,
        });
        Ok(())
    }

    pub fn start(&mut self, performed_by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != CountStatus::Planned {
            return Err(DomainError::invariant(format!(
                "count can only start from Planned (is {:?})",
                self.status
            )));
        }
        self.status = CountStatus::InProgress;
        self.performed_by = Some(performed_by);
        self.started_at = at;
        Ok(())
    }

    /// Record what was found on the shelf. Re-counting overwrites.
    pub fn record_count(
        &mut self,
        product: &ProductCode,
        counted: Quantity,
        note: Option<String>,
        counted_by: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<&CountItem> {
        if self.status != CountStatus::InProgress {
            return Err(DomainError::invariant(format!(
                "counts can only be recorded while InProgress (is {:?})",
                self.status
            )));
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| &i.product == product)
            .ok_or(DomainError::NotFound)?;

        item.counted_quantity = Some(counted);
        item.difference = counted.value() - item.system_quantity.value();
        item.note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        item.counted_at = Some(at);
        item.counted_by = Some(counted_by);
        Ok(item)
    }

    /// Close the count and return one adjustment per counted line.
    ///
    /// Lines with zero difference are included: applying them records that
    /// the balance was confirmed.
    pub fn complete(&mut self, at: DateTime<Utc>) -> DomainResult<Vec<CountAdjustment>> {
        if self.status != CountStatus::InProgress {
            return Err(DomainError::invariant(format!(
                "count can only complete from InProgress (is {:?})",
                self.status
            )));
        }
        self.status = CountStatus::Completed;
        self.finished_at = Some(at);

        Ok(self
            .items
            .iter()
            .filter_map(|i| {
                i.counted_quantity.map(|target| CountAdjustment {
                    product: i.product.clone(),
                    target,
                    difference: i.difference,
                })
            })
            .collect())
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open()?;
        self.status = CountStatus::Cancelled;
        self.finished_at = Some(at);
        Ok(())
    }

    fn ensure_open(&self) -> DomainResult<()> {
        if !self.status.is_open() {
            return Err(DomainError::invariant(format!("count is closed ({:?})", self.status)));
        }
        Ok(())
    }

    pub fn id(&self) -> CountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> CountStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn performed_by(&self) -> Option<UserId> {
        self.performed_by
    }

    pub fn items(&self) -> &[CountItem] {
        &self.items
    }

    pub fn item(&self, product: &ProductCode) -> Option<&CountItem> {
        self.items.iter().find(|i| &i.product == product)
    }

    /// Lines still waiting for a count.
    pub fn pending(&self) -> impl Iterator<Item = &CountItem> {
        self.items.iter().filter(|i| !i.is_counted())
    }
}
