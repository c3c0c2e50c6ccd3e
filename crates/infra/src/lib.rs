//! Infrastructure layer: ledger storage, the atomic movement pipeline, and the
//! application services built on it.

pub mod alerts;
pub mod catalog;
pub mod config;
pub mod counts;
pub mod error;
pub mod ledger;
pub mod reports;
pub mod store;


pub use alerts::{LowStockAlert, LowStockMonitor, MonitorHandle};
pub use catalog::{CatalogRegistry, ProductCatalog, ProductFilter, ProductOrder};
pub use config::{LedgerConfig, RetryPolicy};
pub use counts::{CountCompletion, PhysicalCountService};
pub use error::{ServiceError, ServiceResult};
pub use ledger::{MovementLedger, MovementOutcome};
pub use reports::{DashboardSummary, InventoryReports, MovementQuery};
pub use store::{
    InMemoryLedgerStore, LedgerStore, MovementFilter, MovementPage, Pagination, PostgresLedgerStore,
    StoreError,
};
