//! Unified error handling for shmkit plumbing.
//!
//! `ShmError` covers the fallible edges of the crate: creating and mapping
//! named regions, attaching storages, and registering broadcast readers.
//! Container *operations* (visit, travel, push, ...) do not use this type;
//! they report through the plain-value [`Status`](crate::status::Status)
//! taxonomy instead.

use thiserror::Error;

/// Main error type for shmkit operations.
#[derive(Debug, Error)]
pub enum ShmError {
    /// I/O related errors (region files, truncation, mapping)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared memory management errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// A bounded wait ran out of budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience type alias for Results using ShmError
pub type ShmResult<T> = std::result::Result<T, ShmError>;

impl ShmError {
    /// Create a memory error with a custom message
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        ShmError::Memory(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        ShmError::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        ShmError::InvalidInput(msg.into())
    }
}
