//! Error types for the memory store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Duplicate fact: {0}")]
    DuplicateFact(String),

    #[error("Invalid limit {0}: must be a positive integer")]
    InvalidLimit(usize),

    #[error("Storage handle lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// True when an insert was skipped because an equivalent fact exists.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::DuplicateFact(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
