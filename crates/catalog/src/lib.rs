//! Catalog reference data: product categories and suppliers.
//!
//! Pure domain records with their validation rules. Storage and uniqueness
//! across records live in the infrastructure layer.

pub mod category;
pub mod supplier;

pub use category::{Category, NewCategory};
pub use supplier::{NewSupplier, Supplier, TaxId};
