//! Error types for the facetree library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`FacetreeError`] enum. Per-dimension failures are usually *not* surfaced
//! through this type: the builder and the query generator demote them to an
//! `ERROR` status on the affected [`crate::index::DimensionIndex`] instead.
//!
//! # Examples
//!
//! ```
//! use facetree::error::{FacetreeError, Result};
//!
//! fn lookup() -> Result<()> {
//!     Err(FacetreeError::not_found("domain 'sales'"))
//! }
//!
//! assert!(lookup().is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for facetree operations.
#[derive(Error, Debug)]
pub enum FacetreeError {
    /// I/O errors (status files, fixtures).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Domain model errors (unknown objects, invalid definitions).
    #[error("Model error: {0}")]
    Model(String),

    /// Query rendering or execution errors.
    #[error("Query error: {0}")]
    Query(String),

    /// Member indexing errors.
    #[error("Index error: {0}")]
    Index(String),

    /// Member store backend or status persistence errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A lock was requested again by the call chain already holding it.
    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),

    /// A bounded wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation cancelled.
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with FacetreeError.
pub type Result<T> = std::result::Result<T, FacetreeError>;

impl FacetreeError {
    /// Create a new model error.
    pub fn model<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Model(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Query(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Storage(msg.into())
    }

    /// Create a new cyclic dependency error.
    pub fn cyclic<S: Into<String>>(msg: S) -> Self {
        FacetreeError::CyclicDependency(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Timeout(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        FacetreeError::OperationCancelled(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Other(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Other(format!("Invalid configuration: {}", msg.into()))
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Other(format!("Internal error: {}", msg.into()))
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        FacetreeError::Other(format!("Not found: {}", msg.into()))
    }

    /// Whether this error is the result of cooperative cancellation rather
    /// than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FacetreeError::OperationCancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = FacetreeError::query("bad projection");
        assert_eq!(error.to_string(), "Query error: bad projection");

        let error = FacetreeError::cyclic("domain 'a'");
        assert_eq!(error.to_string(), "Cyclic dependency: domain 'a'");

        let error = FacetreeError::not_found("dimension 'x'");
        assert_eq!(error.to_string(), "Error: Not found: dimension 'x'");
    }

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(FacetreeError::cancelled("interrupted").is_cancellation());
        assert!(!FacetreeError::timeout("indexing").is_cancellation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = FacetreeError::from(io_error);

        match error {
            FacetreeError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}
