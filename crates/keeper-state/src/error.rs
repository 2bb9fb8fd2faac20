//! Ledger errors.
//!
//! Storage failures carry the redb or serde_json message as text so the
//! error stays cheap to log and independent of engine versions.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The redb file could not be created, opened or its tables initialized.
    #[error("failed to open ledger database: {0}")]
    Open(String),

    #[error("ledger transaction failed: {0}")]
    Transaction(String),

    #[error("ledger table unavailable: {0}")]
    Table(String),

    #[error("ledger read failed: {0}")]
    Read(String),

    #[error("ledger write failed: {0}")]
    Write(String),

    /// A state, config, transmission or index entry could not be encoded.
    #[error("failed to encode ledger record: {0}")]
    Serialize(String),

    /// A stored record no longer decodes as its current type.
    #[error("corrupt ledger record: {0}")]
    Deserialize(String),

    /// No persistent state for a digest, or no contract config written yet.
    /// Callers treat this as "start fresh", not as a failure.
    #[error("no ledger record for {0}")]
    NotFound(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguished_from_storage_failures() {
        let missing = LedgerError::NotFound("contract config".to_string());
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "no ledger record for contract config");

        let corrupt = LedgerError::Deserialize("expected value at line 1".to_string());
        assert!(!corrupt.is_not_found());
        assert!(corrupt.to_string().starts_with("corrupt ledger record"));
    }
}
