//! Error types for the record store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the record store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database was written by a newer schema
    #[error("Database version {found} is newer than supported schema {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    /// Node type is not in the node table
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Referenced row does not exist
    #[error("No {table} row with id {id}")]
    NotFound { table: &'static str, id: i64 },

    /// Row was not in the state a transition requires
    #[error("{table} row {id} is not {expected}")]
    InvalidTransition {
        table: &'static str,
        id: i64,
        expected: &'static str,
    },

    /// Stored value could not be interpreted
    #[error("Corrupt {column} in row {id}: {reason}")]
    Corrupt {
        column: &'static str,
        id: i64,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::InvalidTransition {
            table: "data",
            id: 4,
            expected: "ACTIVE",
        };
        assert_eq!(err.to_string(), "data row 4 is not ACTIVE");
    }

    #[test]
    fn test_from_sqlite() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
