//! PostgreSQL target: table clearing, COPY-based writes, trigger and
//! sequence management.

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tracing::debug;

use super::connection::PgConnection;
use crate::config::DatabaseConfig;
use crate::core::identifier::{column_list_pg, qualify_pg, quote_pg};
use crate::core::traits::{ReplicationRole, TargetWriter};
use crate::core::value::{encode_copy_row, Row};
use crate::error::Result;

/// PostgreSQL target writer.
pub struct PostgresWriter {
    conn: PgConnection,
}

impl PostgresWriter {
    /// Connect to the target database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let conn = PgConnection::open(config, "target").await?;
        Ok(Self { conn })
    }
}

/// `COPY` statement for one chunk.
fn copy_statement(schema: &str, table: &str, columns: &[String]) -> Result<String> {
    Ok(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        qualify_pg(schema, table)?,
        column_list_pg(columns)?
    ))
}

/// Query that moves `sequence` to `max(column)` of `schema.table`.
///
/// With rows present, `nextval` then returns `max + 1`; on an empty table the
/// sequence is set to 1 with `is_called = false`, so `nextval` returns 1.
fn resync_statement(schema: &str, table: &str, column: &str) -> Result<String> {
    Ok(format!(
        "SELECT pg_catalog.setval($1::text::regclass, COALESCE(m, 1), m IS NOT NULL) \
         FROM (SELECT MAX({})::bigint AS m FROM {}) s",
        quote_pg(column)?,
        qualify_pg(schema, table)?
    ))
}

#[async_trait]
impl TargetWriter for PostgresWriter {
    async fn begin(&self) -> Result<()> {
        self.conn.client().batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn.client().batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.conn.client().batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn clear_table(&self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {}", qualify_pg(schema, table)?);
        Ok(self.conn.client().execute(&sql, &[]).await?)
    }

    async fn write_chunk(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let statement = copy_statement(schema, table, columns)?;
        let mut buf = String::with_capacity(rows.len() * columns.len() * 16);
        for row in rows {
            encode_copy_row(row, &mut buf);
        }

        let sink = self.conn.client().copy_in(&statement).await?;
        futures::pin_mut!(sink);
        sink.send(Bytes::from(buf)).await?;
        let written = sink.finish().await?;

        debug!("COPY {} rows into {}.{}", written, schema, table);
        Ok(written)
    }

    async fn set_replication_role(&self, role: ReplicationRole) -> Result<()> {
        let sql = format!("SET session_replication_role = {}", role.as_str());
        self.conn.client().batch_execute(&sql).await?;
        Ok(())
    }

    async fn set_triggers_enabled(
        &self,
        schema: &str,
        table: &str,
        enabled: bool,
    ) -> Result<()> {
        let action = if enabled { "ENABLE" } else { "DISABLE" };
        let sql = format!(
            "ALTER TABLE {} {} TRIGGER ALL",
            qualify_pg(schema, table)?,
            action
        );
        self.conn.client().batch_execute(&sql).await?;
        Ok(())
    }

    async fn resync_sequence(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        sequence: &str,
    ) -> Result<i64> {
        let sql = resync_statement(schema, table, column)?;
        let row = self.conn.client().query_one(&sql, &[&sequence]).await?;
        Ok(row.get(0))
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", qualify_pg(schema, table)?);
        let row = self.conn.client().query_one(&query, &[]).await?;
        Ok(row.get(0))
    }

    async fn ping(&self) -> Result<()> {
        self.conn.ping().await
    }

    async fn cancel_statement(&self) -> Result<()> {
        self.conn.cancel_running().await
    }
}
