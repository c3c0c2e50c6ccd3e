use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{
    AggregateRoot, CategoryId, DomainError, DomainResult, Money, ProductCode, Quantity, SupplierId,
};

/// Default unit of measure.
pub const DEFAULT_UNIT: &str = "UN";

/// Input for registering a product in the balance store.
///
/// Raw decimals are validated into [`Quantity`]/[`Money`] by
/// [`Product::register`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub code: ProductCode,
    pub name: String,
    pub description: Option<String>,
    pub category_id: CategoryId,
    pub supplier_id: Option<SupplierId>,
    pub initial_quantity: Decimal,
    pub minimum_quantity: Decimal,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub qr_code: Option<String>,
}

impl NewProduct {
    /// Minimal input: everything numeric at zero, unit `UN`.
    pub fn new(code: ProductCode, name: impl Into<String>, category_id: CategoryId) -> Self {
        Self {
            code,
            name: name.into(),
            description: None,
            category_id,
            supplier_id: None,
            initial_quantity: Decimal::ZERO,
            minimum_quantity: Decimal::ZERO,
            cost_price: Decimal::ZERO,
            sale_price: Decimal::ZERO,
            unit: None,
            location: None,
            qr_code: None,
        }
    }
}

/// Editable catalog fields. The balance is deliberately absent: it only
/// changes through the movement ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    pub description: Option<String>,
    pub category_id: CategoryId,
    pub supplier_id: Option<SupplierId>,
    pub minimum_quantity: Decimal,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub unit: String,
    pub location: Option<String>,
}

/// Flat, persistence-facing view of a product (row mapping, snapshots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub code: ProductCode,
    pub name: String,
    pub description: Option<String>,
    pub category_id: CategoryId,
    pub supplier_id: Option<SupplierId>,
    pub quantity_current: Quantity,
    pub quantity_minimum: Quantity,
    pub cost_price: Money,
    pub sale_price: Money,
    pub unit: String,
    pub location: Option<String>,
    pub qr_code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: a product and its authoritative stock balance.
///
/// Products are never deleted; [`Product::deactivate`] soft-deletes them and
/// keeps the movement history intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    code: ProductCode,
    name: String,
    description: Option<String>,
    category_id: CategoryId,
    supplier_id: Option<SupplierId>,
    quantity_current: Quantity,
    quantity_minimum: Quantity,
    cost_price: Money,
    sale_price: Money,
    unit: String,
    location: Option<String>,
    qr_code: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Product {
    pub const NAME_MAX_LEN: usize = 200;
    pub const UNIT_MAX_LEN: usize = 10;
    pub const LOCATION_MAX_LEN: usize = 100;
    pub const QR_MAX_LEN: usize = 100;

    /// Validate input and build a new, active product at version 1.
    pub fn register(input: NewProduct, now: DateTime<Utc>) -> DomainResult<Self> {
        let qr_code = match trimmed(input.qr_code) {
            Some(qr) => bounded("qr code", qr, Self::QR_MAX_LEN)?,
            None => generate_qr_code(&input.code),
        };

        Ok(Self {
            name: validate_name(&input.name)?,
            description: trimmed(input.description),
            category_id: input.category_id,
            supplier_id: input.supplier_id,
            quantity_current: Quantity::new(input.initial_quantity)?,
            quantity_minimum: Quantity::new(input.minimum_quantity)?,
            cost_price: Money::new(input.cost_price)?,
            sale_price: Money::new(input.sale_price)?,
            unit: validate_unit(input.unit.as_deref().unwrap_or(DEFAULT_UNIT))?,
            location: trimmed(input.location)
                .map(|l| bounded("location", l, Self::LOCATION_MAX_LEN))
                .transpose()?,
            qr_code,
            active: true,
            created_at: now,
            updated_at: now,
            version: 1,
            code: input.code,
        })
    }

    /// Replace the editable catalog fields.
    pub fn update_details(&mut self, details: ProductDetails, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::invariant(format!("product {} is inactive", self.code)));
        }

        let name = validate_name(&details.name)?;
        let quantity_minimum = Quantity::new(details.minimum_quantity)?;
        let cost_price = Money::new(details.cost_price)?;
        let sale_price = Money::new(details.sale_price)?;
        let unit = validate_unit(&details.unit)?;
        let location = trimmed(details.location)
            .map(|l| bounded("location", l, Self::LOCATION_MAX_LEN))
            .transpose()?;

        self.name = name;
        self.description = trimmed(details.description);
        self.category_id = details.category_id;
        self.supplier_id = details.supplier_id;
        self.quantity_minimum = quantity_minimum;
        self.cost_price = cost_price;
        self.sale_price = sale_price;
        self.unit = unit;
        self.location = location;
        self.touch(now);
        Ok(())
    }

    /// Soft delete. Movement history is untouched.
    pub fn deactivate(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::invariant(format!("product {} already inactive", self.code)));
        }
        self.active = false;
        self.touch(now);
        Ok(())
    }

    /// Balance mutation. Only the ledger's `apply` calls this.
    pub(crate) fn set_balance(&mut self, quantity: Quantity, at: DateTime<Utc>) {
        self.quantity_current = quantity;
        self.touch(at);
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.version += 1;
    }

    pub fn code(&self) -> &ProductCode {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn quantity_current(&self) -> Quantity {
        self.quantity_current
    }

    pub fn quantity_minimum(&self) -> Quantity {
        self.quantity_minimum
    }

    pub fn cost_price(&self) -> Money {
        self.cost_price
    }

    pub fn sale_price(&self) -> Money {
        self.sale_price
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `quantity_current <= quantity_minimum`. Recomputed on every read.
    pub fn is_low_stock(&self) -> bool {
        self.quantity_current <= self.quantity_minimum
    }

    /// `quantity_current * cost_price`.
    pub fn stock_value(&self) -> Decimal {
        self.cost_price.times(self.quantity_current)
    }

    pub fn to_record(&self) -> ProductRecord {
        ProductRecord {
            code: self.code.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category_id: self.category_id,
            supplier_id: self.supplier_id,
            quantity_current: self.quantity_current,
            quantity_minimum: self.quantity_minimum,
            cost_price: self.cost_price,
            sale_price: self.sale_price,
            unit: self.unit.clone(),
            location: self.location.clone(),
            qr_code: self.qr_code.clone(),
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

impl From<ProductRecord> for Product {
    fn from(r: ProductRecord) -> Self {
        Self {
            code: r.code,
            name: r.name,
            description: r.description,
            category_id: r.category_id,
            supplier_id: r.supplier_id,
            quantity_current: r.quantity_current,
            quantity_minimum: r.quantity_minimum,
            cost_price: r.cost_price,
            sale_price: r.sale_price,
            unit: r.unit,
            location: r.location,
            qr_code: r.qr_code,
            active: r.active,
            created_at: r.created_at,
            updated_at: r.updated_at,
            version: r.version,
        }
    }
}

impl AggregateRoot for Product {
    type Id = ProductCode;

    fn id(&self) -> &Self::Id {
        &self.code
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// `PROD-{code}-{8 upper hex}`.
pub fn generate_qr_code(code: &ProductCode) -> String {
    // The tail of a v7 uuid is random; the head is a timestamp.
    let hex = Uuid::now_v7().simple().to_string();
    let suffix = hex[hex.len() - 8..].to_uppercase();
    format!("PROD-{code}-{suffix}")
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bounded(what: &str, value: String, max: usize) -> DomainResult<String> {
    if value.chars().count() > max {
        return Err(DomainError::validation(format!("{what} longer than {max} characters")));
    }
    Ok(value)
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("product name cannot be empty"));
    }
    bounded("product name", name.to_string(), Product::NAME_MAX_LEN)
}

fn validate_unit(unit: &str) -> DomainResult<String> {
    let unit = unit.trim();
    if unit.is_empty() {
        return Err(DomainError::validation("unit of measure cannot be empty"));
    }
    bounded("unit of measure", unit.to_uppercase(), Product::UNIT_MAX_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn code(s: &str) -> ProductCode {
        ProductCode::new(s).unwrap()
    }

    fn new_product() -> NewProduct {
        let mut input = NewProduct::new(code("SKU-1"), "Bolt M6", CategoryId::new());
        input.initial_quantity = dec!(10);
        input.minimum_quantity = dec!(5);
        input.cost_price = dec!(1.25);
        input.sale_price = dec!(2.00);
        input
    }

    #[test]
    fn register_generates_qr_code_and_defaults_unit() {
        let product = Product::register(new_product(), Utc::now()).unwrap();

        assert!(product.qr_code().starts_with("PROD-SKU-1-"));
        assert_eq!(product.qr_code().len(), "PROD-SKU-1-".len() + 8);
        assert_eq!(product.unit(), "UN");
        assert_eq!(product.version(), 1);
        assert!(product.is_active());
    }

    #[test]
    fn register_keeps_supplied_qr_code() {
        let mut input = new_product();
        input.qr_code = Some(" QR-42 ".to_string());
        let product = Product::register(input, Utc::now()).unwrap();
        assert_eq!(product.qr_code(), "QR-42");
    }

    #[test]
    fn register_rejects_negative_quantities_and_prices() {
        let mut input = new_product();
        input.initial_quantity = dec!(-1);
        assert!(Product::register(input, Utc::now()).is_err());

        let mut input = new_product();
        input.cost_price = dec!(-0.01);
        assert!(Product::register(input, Utc::now()).is_err());
    }

    #[test]
    fn balance_equal_to_minimum_is_allowed_and_low() {
        let mut input = new_product();
        input.initial_quantity = dec!(5);
        let product = Product::register(input, Utc::now()).unwrap();
        assert!(product.is_low_stock());
    }

    #[test]
    fn stock_value_uses_cost_price() {
        let product = Product::register(new_product(), Utc::now()).unwrap();
        assert_eq!(product.stock_value(), dec!(12.50));
    }

    #[test]
    fn update_details_never_touches_balance() {
        let mut product = Product::register(new_product(), Utc::now()).unwrap();
        let details = ProductDetails {
            name: "Bolt M6 zinc".to_string(),
            description: None,
            category_id: product.category_id(),
            supplier_id: None,
            minimum_quantity: dec!(20),
            cost_price: dec!(1.30),
            sale_price: dec!(2.10),
            unit: "kg".to_string(),
            location: Some("Shelf A2".to_string()),
        };

        product.update_details(details, Utc::now()).unwrap();

        assert_eq!(product.quantity_current().value(), dec!(10));
        assert_eq!(product.unit(), "KG");
        assert!(product.is_low_stock());
        assert_eq!(product.version(), 2);
    }

    #[test]
    fn deactivate_is_one_way_and_bumps_version() {
        let mut product = Product::register(new_product(), Utc::now()).unwrap();
        product.deactivate(Utc::now()).unwrap();
        assert!(!product.is_active());
        assert_eq!(product.version(), 2);
        assert!(product.deactivate(Utc::now()).is_err());
    }

    #[test]
    fn record_round_trip_preserves_state() {
        let product = Product::register(new_product(), Utc::now()).unwrap();
        let restored = Product::from(product.to_record());
        assert_eq!(product, restored);
    }
}
