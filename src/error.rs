//! Error types for the hoopstore storage engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("heap file is corrupt: {0}")]
    CorruptHeap(String),

    #[error("index checkpoint is corrupt: {0}")]
    CorruptIndex(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("locator not present for key: {0}")]
    LocatorNotFound(String),

    #[error("locator out of range: {0}")]
    OutOfRange(String),

    #[error("parse error: {0}")]
    ParseError(String),
}
