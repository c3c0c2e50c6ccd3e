//! Value objects: equality by value, not identity.
//!
//! Stock balances and prices are fixed-point decimals ([`rust_decimal::Decimal`]),
//! never floats, so that thousands of movements cannot accumulate rounding drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Number of decimal places carried by quantities and prices.
pub const DECIMAL_PLACES: u32 = 2;

/// Largest representable quantity or price (10 significant digits, 2 of them fractional).
pub const MAX_DECIMAL: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

fn check_fixed_point(what: &str, value: Decimal) -> DomainResult<Decimal> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(DomainError::validation(format!("{what} cannot be negative (got {value})")));
    }
    if value.normalize().scale() > DECIMAL_PLACES {
        return Err(DomainError::validation(format!(
            "{what} supports at most {DECIMAL_PLACES} decimal places (got {value})"
        )));
    }
    if value > MAX_DECIMAL {
        return Err(DomainError::validation(format!(
            "{what} exceeds the maximum of {MAX_DECIMAL} (got {value})"
        )));
    }
    // Negative zero is folded into plain zero.
    Ok(if value.is_zero() { Decimal::ZERO } else { value })
}

/// A non-negative stock quantity with two decimal places.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        check_fixed_point("quantity", value).map(Self)
    }

    pub fn value(self) -> Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// `self + other`, or `None` if the result leaves the representable range.
    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        let sum = self.0.checked_add(other.0)?;
        Quantity::new(sum).ok()
    }

    /// `self - other`, or `None` if the result would be negative.
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        let diff = self.0.checked_sub(other.0)?;
        Quantity::new(diff).ok()
    }

    /// Absolute distance between two quantities.
    pub fn abs_diff(self, other: Quantity) -> Quantity {
        Quantity((self.0 - other.0).abs())
    }
}

impl ValueObject for Quantity {}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A non-negative monetary amount with two decimal places (cost or sale price).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        check_fixed_point("price", value).map(Self)
    }

    pub fn value(self) -> Decimal {
        self.0
    }

    /// Value of `quantity` units at this price.
    ///
    /// The product of two bounded fixed-point values always fits in a
    /// `Decimal`, so this is exact.
    pub fn times(self, quantity: Quantity) -> Decimal {
        self.0 * quantity.0
    }
}

impl ValueObject for Money {}

impl TryFrom<Decimal> for Money {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
