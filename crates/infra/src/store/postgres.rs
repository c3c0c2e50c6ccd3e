//! Postgres-backed ledger store.
//!
//! ## Atomic commit
//!
//! `commit_movement` runs one transaction:
//!
//! 1. `SET LOCAL lock_timeout` so a blocked row lock surfaces as a retryable
//!    error instead of hanging
//! 2. `UPDATE products ... WHERE code = $1 AND version = $5 AND
//!    quantity_current = $6`; zero rows means another writer got there first
//!    (`Concurrency`) or the movement does not start from the stored balance
//!    (`Backend`)
//! 3. `INSERT INTO stock_movements ... RETURNING sequence`
//! 4. commit
//!
//! The balance and its ledger entry therefore become visible together or not
//! at all.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (lock not available) | `55P03` | `Concurrency` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Concurrency` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed, Io, etc. | N/A | `Backend` |
//!
//! ## Runtime
//!
//! `LedgerStore` is synchronous; the trait impl bridges onto the ambient tokio
//! runtime with `block_in_place`, so it must be called from a multi-threaded
//! runtime worker (or a thread that has entered one).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};

use stockledger_core::{
    AggregateRoot, CategoryId, ExpectedVersion, Money, MovementId, ProductCode, Quantity, SupplierId,
    UserId,
};
use stockledger_inventory::{MovementEntry, MovementKind, Product, ProductRecord, StockMoved};

use crate::config::LedgerConfig;

use super::query::{MovementFilter, MovementPage, Pagination};
use super::{LedgerStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const PRODUCT_COLUMNS: &str = "code, name, description, category_id, supplier_id, quantity_current, \
     quantity_minimum, cost_price, sale_price, unit, location, qr_code, active, created_at, \
     updated_at, version";

const MOVEMENT_COLUMNS: &str = "sequence, movement_id, product_code, kind, quantity, quantity_before, \
     quantity_after, reason, document, note, actor, occurred_at";

/// Postgres-backed products + movement ledger.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// Connect to `config.database_url` and adopt its lock timeout.
    pub async fn from_config(config: &LedgerConfig) -> Result<Self, StoreError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            StoreError::Backend(format!("{} is not set", LedgerConfig::DATABASE_URL))
        })?;
        let store = Self::connect(url, Self::DEFAULT_MAX_CONNECTIONS).await?;
        Ok(store.with_lock_timeout(config.lock_timeout))
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if missing.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, product), fields(code = %product.code()), err)]
    pub async fn insert_product_async(&self, product: &Product) -> Result<(), StoreError> {
        let r = product.to_record();
        sqlx::query(&format!(
            "INSERT INTO products ({PRODUCT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(r.code.as_str())
        .bind(&r.name)
        .bind(&r.description)
        .bind(r.category_id.as_uuid())
        .bind(r.supplier_id.map(|s| *s.as_uuid()))
        .bind(r.quantity_current.value())
        .bind(r.quantity_minimum.value())
        .bind(r.cost_price.value())
        .bind(r.sale_price.value())
        .bind(&r.unit)
        .bind(&r.location)
        .bind(&r.qr_code)
        .bind(r.active)
        .bind(r.created_at)
        .bind(r.updated_at)
        .bind(r.version as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    pub async fn load_product_async(&self, code: &ProductCode) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = $1"))
            .bind(code.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_product", e))?;
        row.map(|r| product_from_row(&r)).transpose()
    }

    pub async fn find_by_qr_async(&self, qr_code: &str) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE qr_code = $1"))
            .bind(qr_code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_qr", e))?;
        row.map(|r| product_from_row(&r)).transpose()
    }

    pub async fn list_products_async(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self, product), fields(code = %product.code(), expected = ?expected), err)]
    pub async fn save_product_async(
        &self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let r = product.to_record();
        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = $2,
                description = $3,
                category_id = $4,
                supplier_id = $5,
                quantity_minimum = $6,
                cost_price = $7,
                sale_price = $8,
                unit = $9,
                location = $10,
                active = $11,
                updated_at = $12,
                version = $13
            WHERE code = $1 AND ($14::bigint IS NULL OR version = $14)
            "#,
        )
        .bind(r.code.as_str())
        .bind(&r.name)
        .bind(&r.description)
        .bind(r.category_id.as_uuid())
        .bind(r.supplier_id.map(|s| *s.as_uuid()))
        .bind(r.quantity_minimum.value())
        .bind(r.cost_price.value())
        .bind(r.sale_price.value())
        .bind(&r.unit)
        .bind(&r.location)
        .bind(r.active)
        .bind(r.updated_at)
        .bind(r.version as i64)
        .bind(expected_param(expected))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_product", e))?;

        if result.rows_affected() == 0 {
            return Err(self.missing_or_conflict(&r.code, expected, None).await);
        }
        Ok(())
    }

    #[instrument(
        skip(self, product, movement),
        fields(
            code = %product.code(),
            kind = %movement.kind,
            expected = ?expected,
            sequence = tracing::field::Empty
        ),
        err
    )]
    pub async fn commit_movement_async(
        &self,
        product: &Product,
        expected: ExpectedVersion,
        movement: StockMoved,
    ) -> Result<MovementEntry, StoreError> {
        let span = Span::current();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE products
            SET quantity_current = $2, updated_at = $3, version = $4
            WHERE code = $1
                AND ($5::bigint IS NULL OR version = $5)
                AND quantity_current = $6
            "#,
        )
        .bind(product.code().as_str())
        .bind(product.quantity_current().value())
        .bind(product.updated_at())
        .bind(product.version() as i64)
        .bind(expected_param(expected))
        .bind(movement.quantity_before.value())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(self
                .missing_or_conflict(product.code(), expected, Some(movement.quantity_before))
                .await);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO stock_movements (
                movement_id, product_code, kind, quantity, quantity_before, quantity_after,
                reason, document, note, actor, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING sequence
            "#,
        )
        .bind(movement.movement_id.as_uuid())
        .bind(movement.product.as_str())
        .bind(movement.kind.as_str())
        .bind(movement.quantity.value())
        .bind(movement.quantity_before.value())
        .bind(movement.quantity_after.value())
        .bind(&movement.reason)
        .bind(&movement.document)
        .bind(&movement.note)
        .bind(movement.actor.as_uuid())
        .bind(movement.occurred_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        let sequence: i64 = row
            .try_get("sequence")
            .map_err(|e| StoreError::Backend(format!("failed to read sequence: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        span.record("sequence", sequence);
        Ok(MovementEntry::committed(sequence as u64, movement))
    }

    pub async fn query_movements_async(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let product = filter.product.as_ref().map(ProductCode::as_str);
        let kind = filter.kind.map(MovementKind::as_str);

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM stock_movements
            WHERE ($1::text IS NULL OR product_code = $1)
                AND ($2::text IS NULL OR kind = $2)
            "#,
        )
        .bind(product)
        .bind(kind)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE ($1::text IS NULL OR product_code = $1) \
                 AND ($2::text IS NULL OR kind = $2) \
             ORDER BY occurred_at DESC, sequence DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(product)
        .bind(kind)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let entries = rows
            .iter()
            .map(|row| {
                MovementRow::from_row(row)
                    .map_err(|e| StoreError::Backend(format!("failed to deserialize movement row: {e}")))?
                    .try_into()
            })
            .collect::<Result<Vec<MovementEntry>, StoreError>>()?;

        let total = total as u64;
        Ok(MovementPage {
            entries,
            total,
            pagination,
            has_more: total > pagination.offset() + pagination.limit(),
        })
    }

    async fn missing_or_conflict(
        &self,
        code: &ProductCode,
        expected: ExpectedVersion,
        before: Option<Quantity>,
    ) -> StoreError {
        let row = match sqlx::query("SELECT version, quantity_current FROM products WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&*self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) => return map_sqlx_error("check_version", e),
        };
        let found = match row {
            Some(row) => {
                let version: Result<i64, _> = row.try_get("version");
                let balance: Result<Decimal, _> = row.try_get("quantity_current");
                match (version, balance) {
                    (Ok(version), Ok(balance)) => Some((version, balance)),
                    (Err(e), _) | (_, Err(e)) => {
                        return StoreError::Backend(format!("failed to read product {code}: {e}"));
                    }
                }
            }
            None => None,
        };
        missed_update(code, expected, found, before)
    }

    fn block_on<T>(&self, fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Backend(
                "PostgresLedgerStore requires a tokio runtime; call it from within a runtime context"
                    .to_string(),
            )
        })?;
        tokio::task::block_in_place(|| handle.block_on(fut))
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        self.block_on(self.insert_product_async(product))
    }

    fn load_product(&self, code: &ProductCode) -> Result<Option<Product>, StoreError> {
        self.block_on(self.load_product_async(code))
    }

    fn find_by_qr(&self, qr_code: &str) -> Result<Option<Product>, StoreError> {
        self.block_on(self.find_by_qr_async(qr_code))
    }

    fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.block_on(self.list_products_async())
    }

    fn save_product(&self, product: &Product, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.block_on(self.save_product_async(product, expected))
    }

    fn commit_movement(
        &self,
        product: &Product,
        expected: ExpectedVersion,
        movement: StockMoved,
    ) -> Result<MovementEntry, StoreError> {
        self.block_on(self.commit_movement_async(product, expected, movement))
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        self.block_on(self.query_movements_async(filter, pagination))
    }
}

fn expected_param(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

/// Why a guarded `UPDATE products` touched no rows, given what the row holds
/// now (`version`, `quantity_current`).
fn missed_update(
    code: &ProductCode,
    expected: ExpectedVersion,
    found: Option<(i64, Decimal)>,
    before: Option<Quantity>,
) -> StoreError {
    match (found, before) {
        (None, _) => StoreError::NotFound(format!("product {code}")),
        (Some((version, _)), _) if !expected.matches(version as u64) => {
            StoreError::Concurrency(format!("product {code}: expected {expected:?}, found {version}"))
        }
        (Some((_, balance)), Some(before)) if before.value() != balance => StoreError::Backend(format!(
            "movement on product {code} starts from {before} but the stored balance is {balance}"
        )),
        (Some((version, _)), _) => {
            StoreError::Concurrency(format!("product {code}: row changed at version {version}"))
        }
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("55P03") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Concurrency(format!("timed out waiting for a connection in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("invalid {what} in row: {err}"))
}

fn quantity(value: Decimal) -> Result<Quantity, StoreError> {
    Quantity::new(value).map_err(|e| corrupt("quantity", e))
}

fn money(value: Decimal) -> Result<Money, StoreError> {
    Money::new(value).map_err(|e| corrupt("price", e))
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    code: String,
    name: String,
    description: Option<String>,
    category_id: uuid::Uuid,
    supplier_id: Option<uuid::Uuid>,
    quantity_current: Decimal,
    quantity_minimum: Decimal,
    cost_price: Decimal,
    sale_price: Decimal,
    unit: String,
    location: Option<String>,
    qr_code: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category_id: row.try_get("category_id")?,
            supplier_id: row.try_get("supplier_id")?,
            quantity_current: row.try_get("quantity_current")?,
            quantity_minimum: row.try_get("quantity_minimum")?,
            cost_price: row.try_get("cost_price")?,
            sale_price: row.try_get("sale_price")?,
            unit: row.try_get("unit")?,
            location: row.try_get("location")?,
            qr_code: row.try_get("qr_code")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product::from(ProductRecord {
            code: ProductCode::new(&row.code).map_err(|e| corrupt("product code", e))?,
            name: row.name,
            description: row.description,
            category_id: CategoryId::from_uuid(row.category_id),
            supplier_id: row.supplier_id.map(SupplierId::from_uuid),
            quantity_current: quantity(row.quantity_current)?,
            quantity_minimum: quantity(row.quantity_minimum)?,
            cost_price: money(row.cost_price)?,
            sale_price: money(row.sale_price)?,
            unit: row.unit,
            location: row.location,
            qr_code: row.qr_code,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version as u64,
        }))
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    ProductRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize product row: {e}")))?
        .try_into()
}

#[derive(Debug)]
struct MovementRow {
    sequence: i64,
    movement_id: uuid::Uuid,
    product_code: String,
    kind: String,
    quantity: Decimal,
    quantity_before: Decimal,
    quantity_after: Decimal,
    reason: String,
    document: Option<String>,
    note: Option<String>,
    actor: uuid::Uuid,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            sequence: row.try_get("sequence")?,
            movement_id: row.try_get("movement_id")?,
            product_code: row.try_get("product_code")?,
            kind: row.try_get("kind")?,
            quantity: row.try_get("quantity")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            reason: row.try_get("reason")?,
            document: row.try_get("document")?,
            note: row.try_get("note")?,
            actor: row.try_get("actor")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl TryFrom<MovementRow> for MovementEntry {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement = StockMoved {
            movement_id: MovementId::from_uuid(row.movement_id),
            product: ProductCode::new(&row.product_code).map_err(|e| corrupt("product code", e))?,
            kind: row.kind.parse().map_err(|e: String| corrupt("movement kind", e))?,
            quantity: quantity(row.quantity)?,
            quantity_before: quantity(row.quantity_before)?,
            quantity_after: quantity(row.quantity_after)?,
            reason: row.reason,
            document: row.document,
            note: row.note,
            actor: UserId::from_uuid(row.actor),
            occurred_at: row.occurred_at,
        };
        Ok(MovementEntry::committed(row.sequence as u64, movement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn code() -> ProductCode {
        ProductCode::new("SKU-1").unwrap()
    }

    fn qty(value: Decimal) -> Quantity {
        Quantity::new(value).unwrap()
    }

    #[test]
    fn missed_update_without_a_row_is_not_found() {
        let err = missed_update(&code(), ExpectedVersion::Exact(1), None, Some(qty(dec!(10))));
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn missed_update_on_a_newer_version_is_a_conflict() {
        let found = Some((4, dec!(10)));
        let err = missed_update(&code(), ExpectedVersion::Exact(3), found, Some(qty(dec!(12))));
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[test]
    fn missed_update_from_the_wrong_balance_is_rejected() {
        let found = Some((3, dec!(10)));
        let err = missed_update(&code(), ExpectedVersion::Exact(3), found, Some(qty(dec!(100))));
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn from_config_requires_a_database_url() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = runtime
            .block_on(PostgresLedgerStore::from_config(&LedgerConfig::default()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("DATABASE_URL")));
    }

    #[test]
    fn store_errors_classify_pool_failures() {
        assert!(matches!(map_sqlx_error("load", sqlx::Error::PoolTimedOut), StoreError::Concurrency(_)));
        assert!(matches!(map_sqlx_error("load", sqlx::Error::PoolClosed), StoreError::Backend(_)));
    }
}
