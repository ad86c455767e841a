//! Error types for the copy engine.

use thiserror::Error;

/// Main error type for schema copy operations.
///
/// Only run-aborting failures travel through this type. Per-table copy
/// failures, trigger toggle failures and sequence resync failures are
/// recovered where they happen and surface in the run report instead.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not establish or test a database connection
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Database query error outside of a table copy
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Schema introspection failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Copy failed for a specific table
    #[error("Copy failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Some tables failed and the run was configured to treat that as an error
    #[error("{} table(s) failed to copy: {}", failed.len(), failed.join(", "))]
    PartialFailure { failed: Vec<String> },

    /// Row counts differ between source and target
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid SQL identifier
    #[error("Invalid identifier: {0}")]
    Identifier(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Copy cancelled")]
    Cancelled,
}

/// Process exit codes, one per error class.
pub mod exit_codes {
    pub const CONFIG: u8 = 1;
    pub const CONNECTION: u8 = 2;
    pub const CATALOG: u8 = 3;
    pub const DATABASE: u8 = 4;
    pub const PARTIAL_FAILURE: u8 = 5;
    pub const CANCELLED: u8 = 6;
    pub const IO: u8 = 7;
    pub const VALIDATION: u8 = 8;
}

impl CopyError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        CopyError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        CopyError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Exit code the CLI reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CopyError::Config(_) | CopyError::Yaml(_) | CopyError::Identifier(_) => {
                exit_codes::CONFIG
            }
            CopyError::Connection { .. } => exit_codes::CONNECTION,
            CopyError::Catalog(_) => exit_codes::CATALOG,
            CopyError::Database(_) | CopyError::Json(_) => exit_codes::DATABASE,
            CopyError::Transfer { .. } | CopyError::PartialFailure { .. } => {
                exit_codes::PARTIAL_FAILURE
            }
            CopyError::Cancelled => exit_codes::CANCELLED,
            CopyError::Io(_) => exit_codes::IO,
            CopyError::Validation(_) => exit_codes::VALIDATION,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        assert_eq!(CopyError::Config("x".into()).exit_code(), 1);
        assert_eq!(CopyError::connection("refused", "source").exit_code(), 2);
        assert_eq!(CopyError::Catalog("x".into()).exit_code(), 3);
        assert_eq!(
            CopyError::PartialFailure {
                failed: vec!["a".into()]
            }
            .exit_code(),
            5
        );
        assert_eq!(CopyError::Cancelled.exit_code(), 6);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(CopyError::from(io).exit_code(), 7);
    }

    #[test]
    fn test_partial_failure_lists_tables() {
        let err = CopyError::PartialFailure {
            failed: vec!["orders".into(), "items".into()],
        };
        assert_eq!(err.to_string(), "2 table(s) failed to copy: orders, items");
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = CopyError::transfer("orders", "insert rejected");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Copy failed for table orders: insert rejected"));
    }
}
