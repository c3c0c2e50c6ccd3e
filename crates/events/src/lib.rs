//! Ledger events and their distribution.
//!
//! The ledger persists a movement first and only then announces it. This crate
//! holds the announcement side: the [`Event`] contract, the [`EventEnvelope`]
//! carrying stream metadata, and the [`EventBus`] pub/sub abstraction.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
