use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, SupplierId};

use crate::category::normalize_optional;

/// Company tax id (CNPJ): exactly 14 digits once punctuation is stripped.
///
/// The digits-only form is what uniqueness is checked against, so
/// `12.345.678/0001-90` and `12345678000190` are the same supplier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    pub const DIGITS: usize = 14;

    pub fn parse(raw: &str) -> DomainResult<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != Self::DIGITS {
            return Err(DomainError::validation(format!(
                "tax id must have {} digits (got {})",
                Self::DIGITS,
                digits.len()
            )));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaxId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

/// Input for registering a supplier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSupplier {
    pub name: String,
    pub tax_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// Supplier record. Suppliers are deactivated, never deleted, because products
/// keep referencing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    id: SupplierId,
    name: String,
    tax_id: Option<TaxId>,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl Supplier {
    pub const NAME_MAX_LEN: usize = 200;

    pub fn register(id: SupplierId, input: NewSupplier, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("supplier name cannot be empty"));
        }
        if name.chars().count() > Self::NAME_MAX_LEN {
            return Err(DomainError::validation(format!(
                "supplier name longer than {} characters",
                Self::NAME_MAX_LEN
            )));
        }

        let tax_id = normalize_optional(input.tax_id)
            .map(|raw| TaxId::parse(&raw))
            .transpose()?;

        let email = normalize_optional(input.email).map(|e| e.to_lowercase());
        if let Some(email) = &email {
            validate_email(email)?;
        }

        Ok(Self {
            id,
            name: name.to_string(),
            tax_id,
            phone: normalize_optional(input.phone),
            email,
            address: normalize_optional(input.address),
            active: true,
            created_at: now,
        })
    }

    pub fn deactivate(&mut self) -> DomainResult<()> {
        if !self.active {
            return Err(DomainError::invariant("supplier already inactive"));
        }
        self.active = false;
        Ok(())
    }

    pub fn id_typed(&self) -> SupplierId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tax_id(&self) -> Option<&TaxId> {
        self.tax_id.as_ref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for Supplier {
    type Id = SupplierId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_email(email: &str) -> DomainResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DomainError::validation(format!("invalid email address: {email}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> NewSupplier {
        NewSupplier {
            name: name.to_string(),
            ..NewSupplier::default()
        }
    }

    #[test]
    fn tax_id_strips_punctuation() {
        let tax = TaxId::parse("12.345.678/0001-90").unwrap();
        assert_eq!(tax.as_str(), "12345678000190");
        assert!(TaxId::parse("123").is_err());
    }

    #[test]
    fn register_validates_optional_fields() {
        let mut bad_email = input("ACME");
        bad_email.email = Some("not-an-email".to_string());
        assert!(Supplier::register(SupplierId::new(), bad_email, Utc::now()).is_err());

        let mut ok = input("ACME");
        ok.email = Some(" Sales@ACME.com ".to_string());
        ok.tax_id = Some("12345678000190".to_string());
        let supplier = Supplier::register(SupplierId::new(), ok, Utc::now()).unwrap();
        assert_eq!(supplier.email(), Some("sales@acme.com"));
        assert!(supplier.is_active());
    }

    #[test]
    fn deactivate_is_one_way() {
        let mut supplier = Supplier::register(SupplierId::new(), input("ACME"), Utc::now()).unwrap();
        supplier.deactivate().unwrap();
        assert!(!supplier.is_active());
        assert!(supplier.deactivate().is_err());
    }
}
