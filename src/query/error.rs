//! Query error types
//!
//! Every error a statement can fail with. The `Display` text of each variant
//! is exactly the message reported back in the statement result.

use std::fmt;
use thiserror::Error;

use crate::model::DataType;

/// Errors that can occur while planning or executing a statement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A function was fed a value type it cannot operate on
    #[error("type mismatch: {function}() cannot operate on {data_type} values")]
    TypeMismatch {
        function: String,
        data_type: DataType,
    },

    /// Wrong arity or wrong kind of argument in a call or clause
    #[error("{0}")]
    InvalidArgument(String),

    /// Bare field reference mixed with aggregates
    #[error("mixing aggregate and non-aggregate queries is not supported")]
    MixedAggregate,

    /// distinct() combined with other calls or fields
    #[error("aggregate function distinct() cannot be combined with other functions or fields")]
    DistinctCombination,

    /// An admission or statement limit was exceeded
    #[error("{0}")]
    LimitExceeded(LimitViolation),

    /// Unknown database or retention policy
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The query was cancelled through its cancellation token
    #[error("query interrupted")]
    Cancelled,

    /// The query ran past its deadline
    #[error("query-timeout limit exceeded")]
    Timeout,

    /// A storage collaborator failed
    #[error("storage error: {0}")]
    Storage(String),

    /// The execution task itself failed
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Shorthand for an `InvalidArgument` error
    pub fn invalid(msg: impl Into<String>) -> Self {
        QueryError::InvalidArgument(msg.into())
    }

    pub fn type_mismatch(function: &str, data_type: DataType) -> Self {
        QueryError::TypeMismatch {
            function: function.to_string(),
            data_type,
        }
    }

    pub fn database_not_found(name: &str) -> Self {
        QueryError::NotFound {
            kind: "database",
            name: name.to_string(),
        }
    }

    pub fn retention_policy_not_found(name: &str) -> Self {
        QueryError::NotFound {
            kind: "retention policy",
            name: name.to_string(),
        }
    }
}

impl From<crate::storage::StorageError> for QueryError {
    fn from(err: crate::storage::StorageError) -> Self {
        QueryError::Storage(err.to_string())
    }
}

/// Which limit was exceeded, and by how much
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitViolation {
    /// Series fan-out exceeded the admission guard
    MaxSelectSeries { actual: usize, limit: usize },
    /// Too many GROUP BY time buckets
    MaxSelectBuckets { actual: usize, limit: usize },
    /// Too many raw points read at the leaves
    MaxSelectPoint { actual: usize, limit: usize },
    /// top()/bottom() N larger than the statement LIMIT
    SelectorLimit {
        function: String,
        n: usize,
        limit: usize,
    },
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxSelectSeries { actual, limit } => {
                write!(f, "max-select-series limit exceeded: ({}/{})", actual, limit)
            }
            Self::MaxSelectBuckets { actual, limit } => {
                write!(f, "max-select-buckets limit exceeded: ({}/{})", actual, limit)
            }
            Self::MaxSelectPoint { actual, limit } => {
                write!(f, "max-select-point limit exceeded: ({}/{})", actual, limit)
            }
            Self::SelectorLimit { function, n, limit } => write!(
                f,
                "limit ({}) in {} function can not be larger than the LIMIT ({}) in the select statement",
                n, function, limit
            ),
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::invalid("expected field argument in count()");
        assert_eq!(err.to_string(), "expected field argument in count()");

        let err = QueryError::LimitExceeded(LimitViolation::MaxSelectSeries {
            actual: 4,
            limit: 3,
        });
        assert_eq!(err.to_string(), "max-select-series limit exceeded: (4/3)");

        let err = QueryError::database_not_found("db0");
        assert_eq!(err.to_string(), "database not found: db0");

        let err = QueryError::type_mismatch("sum", DataType::String);
        assert_eq!(
            err.to_string(),
            "type mismatch: sum() cannot operate on string values"
        );
    }

    #[test]
    fn test_selector_limit_display() {
        let err = QueryError::LimitExceeded(LimitViolation::SelectorLimit {
            function: "top".into(),
            n: 5,
            limit: 3,
        });
        assert_eq!(
            err.to_string(),
            "limit (5) in top function can not be larger than the LIMIT (3) in the select statement"
        );
    }
}
