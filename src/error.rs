//! Crate-wide error type.
//!
//! Mirrors the four error kinds from the original control-plane's design:
//! validation, resource exhaustion, backend failure, and allocator failure.

use thiserror::Error;

/// Result alias used throughout the crate, except where the IOVA
/// allocator's sentinel-flavored public contract is preserved verbatim
/// (see [`crate::iova`]).
pub type Result<T> = std::result::Result<T, CtlError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CtlError {
    /// Missing handle, unknown table/action, entry shape mismatch,
    /// stub/non-stub mismatch, malformed text, etc.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Allocation failure while staging or duplicating an entry.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// A table backend operation (`create`/`add`/`del`) reported failure.
    #[error("backend error in table {table}: {reason}")]
    Backend { table: String, reason: String },

    /// The IOVA allocator could not satisfy a request.
    #[error("iova allocator error: {0}")]
    Allocator(String),
}

impl CtlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CtlError::Validation(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        CtlError::Resource(msg.into())
    }

    pub fn backend(table: impl Into<String>, reason: impl Into<String>) -> Self {
        CtlError::Backend {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn allocator(msg: impl Into<String>) -> Self {
        CtlError::Allocator(msg.into())
    }
}
