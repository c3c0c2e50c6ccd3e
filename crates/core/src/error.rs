//! Errors raised by catalog records, counts and value objects.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure of a domain rule.
///
/// Ledger movements have their own `LedgerError` in `stockledger-inventory`;
/// this type covers everything around them (catalog data, counts, ids).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input rejected before touching any state: blank name, bad email,
    /// negative price, too many decimal places.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A state transition the record does not allow, such as completing a
    /// count that was never started.
    #[error("operation not allowed: {0}")]
    InvariantViolation(String),

    /// Malformed product code or uuid text.
    #[error("bad identifier: {0}")]
    InvalidId(String),

    #[error("record does not exist")]
    NotFound,

    /// Duplicate code, name, tax id or email, or a stale version.
    #[error("conflicting record: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True when the caller may reload and try again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_invite_a_retry() {
        assert!(DomainError::conflict("version 3 is stale").is_conflict());
        assert!(!DomainError::NotFound.is_conflict());
        assert!(!DomainError::validation("blank name").is_conflict());
    }

    #[test]
    fn messages_carry_the_detail() {
        let err = DomainError::invalid_id("ProductCode cannot be blank");
        assert_eq!(err.to_string(), "bad identifier: ProductCode cannot be blank");
    }
}
