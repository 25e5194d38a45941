// error.rs - crate-wide error type
//
// One enum, thiserror-derived, with #[from] conversions for the underlying
// I/O/serialization failures so `?` works at call sites without manual
// mapping.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corruption(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("numeric key out of range (must fit in ±10^12): {0}")]
    OutOfRange(i64),

    #[error("index error: {0}")]
    IndexError(String),

    #[error(transparent)]
    Watch(#[from] notify::Error),
}
