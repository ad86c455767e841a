//! Database capabilities consumed by the copy engine.
//!
//! The engine never talks to a driver directly. Each side of the copy is
//! reached through these traits, implemented for PostgreSQL in
//! [`crate::drivers::postgres`] and by in-memory doubles in tests.
//!
//! All methods take `&self`: implementations own exactly one connection and
//! are used strictly sequentially, one call at a time.

use async_trait::async_trait;

use crate::core::schema::{ColumnInfo, DependencyEdge};
use crate::core::value::{Batch, Row};
use crate::error::Result;

/// Schema introspection against the source database.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Base table names in `schema`, ordered by name.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Columns of `schema.table` in ordinal order.
    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Foreign keys whose both ends lie in `schema`.
    ///
    /// May contain duplicates when a pair of tables is linked by more than
    /// one constraint.
    async fn list_foreign_keys(&self, schema: &str) -> Result<Vec<DependencyEdge>>;
}

/// Row access to the source database.
///
/// At most one cursor is open at a time.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Open a read-only cursor selecting exactly `columns`, in order.
    async fn open_cursor(&self, schema: &str, table: &str, columns: &[String]) -> Result<()>;

    /// Fetch up to `max_rows` rows from the open cursor.
    ///
    /// The returned batch is marked final once the cursor is exhausted.
    async fn fetch(&self, max_rows: usize) -> Result<Batch>;

    /// Close the cursor and end its read transaction.
    async fn close_cursor(&self) -> Result<()>;

    /// Count rows in `schema.table`.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Round trip to check the connection is alive.
    async fn ping(&self) -> Result<()>;

    /// Ask the server to abandon whatever statement this connection is
    /// running. The interrupted call then fails on its own.
    async fn cancel_statement(&self) -> Result<()> {
        Ok(())
    }
}

/// Session-level trigger behavior for `session_replication_role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    /// Normal trigger and foreign-key enforcement.
    Origin,
    /// Ordinary triggers, including FK checks, do not fire.
    Replica,
}

impl ReplicationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationRole::Origin => "origin",
            ReplicationRole::Replica => "replica",
        }
    }
}

/// Write access to the target database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Start the transaction scoping one table's copy.
    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Remove every row from `schema.table` with `DELETE`. Returns rows removed.
    async fn clear_table(&self, schema: &str, table: &str) -> Result<u64>;

    /// Write one chunk of rows with a single statement. Returns rows written.
    async fn write_chunk(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;

    /// Set `session_replication_role` for the connection.
    async fn set_replication_role(&self, role: ReplicationRole) -> Result<()>;

    /// Enable or disable all triggers on `schema.table`.
    async fn set_triggers_enabled(&self, schema: &str, table: &str, enabled: bool)
        -> Result<()>;

    /// Move `sequence` so the next value follows `max(column)` in `schema.table`.
    ///
    /// On an empty table the sequence is reset so its next value is 1.
    /// Returns the value the sequence was set to.
    async fn resync_sequence(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        sequence: &str,
    ) -> Result<i64>;

    /// Count rows in `schema.table`.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Round trip to check the connection is alive.
    async fn ping(&self) -> Result<()>;

    /// Ask the server to abandon whatever statement this connection is
    /// running.
    async fn cancel_statement(&self) -> Result<()> {
        Ok(())
    }
}
