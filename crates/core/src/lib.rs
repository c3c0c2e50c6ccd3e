//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! errors, typed identifiers, the aggregate contract used by the stock ledger,
//! and the fixed-point value objects every balance is expressed in.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CategoryId, CountId, MovementId, ProductCode, SupplierId, UserId};
pub use value_object::{Money, Quantity, ValueObject, DECIMAL_PLACES, MAX_DECIMAL};
