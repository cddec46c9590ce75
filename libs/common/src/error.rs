//! Custom error types for the common library
//!
//! Driver errors are carried unchanged as the `source` of each variant so
//! callers can inspect what PostgreSQL actually reported.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred while opening the connection pool
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred while introspecting or altering the schema
    #[error("Database migration error: {0}")]
    Migration(#[source] SqlxError),

    /// A declared column exists in the live table with another type
    #[error(
        "Schema conflict on {table}.{column}: declared type `{expected}` but database has `{found}`"
    )]
    SchemaConflict {
        table: String,
        column: String,
        expected: String,
        found: String,
    },

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

impl From<config::ConfigError> for DatabaseError {
    fn from(err: config::ConfigError) -> Self {
        DatabaseError::Configuration(err.to_string())
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
