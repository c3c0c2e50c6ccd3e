//! Error surface of the application services (catalog, reports, counts).

use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::LedgerError;

use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Backend failure that has no domain meaning.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate(msg) | StoreError::Concurrency(msg) => {
                ServiceError::Domain(DomainError::Conflict(msg))
            }
            StoreError::NotFound(_) => ServiceError::Domain(DomainError::NotFound),
            other @ StoreError::Backend(_) => ServiceError::Store(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
