//! Common error types for the annotation mirror

use thiserror::Error;

/// Common result type for annotation mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the annotation mirror crates
#[derive(Error, Debug)]
pub enum Error {
    /// Store could not complete the operation (wraps sqlx::Error)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored row could not be decoded into the model
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}
