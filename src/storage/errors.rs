use thiserror::Error;

use crate::validation::NameError;

/// Errors that can arise while interacting with the player store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, thread spawn, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// A unique name or key is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Password hashing or hash parsing failed.
    #[error("password hash error: {0}")]
    Password(String),

    /// An item row set whose ids are not unique and contiguous from the first row id.
    #[error("invalid item rows: {0}")]
    InvalidItemRows(String),

    /// Name rejected by the validation rules.
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<sled::transaction::TransactionError<StoreError>> for StoreError {
    fn from(err: sled::transaction::TransactionError<StoreError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}
