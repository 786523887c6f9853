//! Error types shared across the restock workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, RestockError>;

/// Main error type for shared domain code
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RestockError {
    #[error("Unknown PO status code: {0} (expected 1-6)")]
    UnknownStatusCode(i64),

    #[error("Invalid PO status: {0}")]
    InvalidStatus(String),
}
