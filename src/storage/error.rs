//! Storage collaborator error types
//!
//! Defines the errors the catalog and shard readers can report to the
//! query engine, and the errors of the in-memory reference store.

use thiserror::Error;

use crate::model::DataType;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Line protocol input could not be parsed
    #[error("Line protocol error at line {line}: {message}")]
    LineProtocol { line: usize, message: String },

    /// A write used a different type than the field already has
    #[error("Field type conflict: {field} is {existing}, got {attempted}")]
    FieldTypeConflict {
        field: String,
        existing: DataType,
        attempted: DataType,
    },

    /// Requested database does not exist
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// Requested retention policy does not exist
    #[error("Retention policy not found: {0}")]
    RetentionPolicyNotFound(String),

    /// A shard failed while opening or reading a series
    #[error("Shard read failed: {0}")]
    ShardRead(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::DatabaseNotFound("db0".to_string());
        assert_eq!(err.to_string(), "Database not found: db0");

        let err = StorageError::FieldTypeConflict {
            field: "value".to_string(),
            existing: DataType::Float,
            attempted: DataType::String,
        };
        assert_eq!(
            err.to_string(),
            "Field type conflict: value is float, got string"
        );
    }
}
