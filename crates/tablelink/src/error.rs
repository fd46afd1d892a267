//! Error types for tablelink

use thiserror::Error;

/// Result type alias for tablelink operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for table operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Consistency guard violation: multi-table statement in single-table
    /// mode, handle/table mismatch, transaction misuse, or a mutation
    /// without a where condition.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Malformed relation descriptor
    #[error("Relation format error: {0}")]
    RelationFormat(String),

    /// Parameter binding / prepare failure reported by the driver
    #[error("Bind error: {0}")]
    Bind(String),

    /// Unrecognized verb reached the render step
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Ambiguous or missing arguments when loading a single record
    #[error("Record load error: {0}")]
    RecordLoad(String),

    /// Connection-level error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl OrmError {
    /// Create a consistency error
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency(message.into())
    }

    /// Create a relation format error
    pub fn relation_format(message: impl Into<String>) -> Self {
        Self::RelationFormat(message.into())
    }

    /// Create a bind error wrapping a driver diagnostic
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind(message.into())
    }

    /// Create a record load error
    pub fn record_load(message: impl Into<String>) -> Self {
        Self::RecordLoad(message.into())
    }

    /// Check if this is a consistency error
    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
