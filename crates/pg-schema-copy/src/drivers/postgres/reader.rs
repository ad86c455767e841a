//! PostgreSQL source: schema introspection and cursor-based row reads.
//!
//! Rows are read through a server-side cursor with the simple query
//! protocol, so every value arrives in the server's text output format and
//! is handed to the target unchanged.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_postgres::SimpleQueryMessage;
use tracing::{debug, warn};

use super::connection::PgConnection;
use crate::config::DatabaseConfig;
use crate::core::identifier::{column_list_pg, qualify_pg, quote_pg};
use crate::core::schema::{ColumnInfo, DependencyEdge};
use crate::core::traits::{SchemaIntrospector, SourceReader};
use crate::core::value::{Batch, Row};
use crate::error::Result;

const CURSOR_NAME: &str = "pg_schema_copy_rows";

/// PostgreSQL source reader.
pub struct PostgresReader {
    conn: PgConnection,
    cursor_open: AtomicBool,
}

impl PostgresReader {
    /// Connect to the source database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let conn = PgConnection::open(config, "source").await?;
        Ok(Self {
            conn,
            cursor_open: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl SchemaIntrospector for PostgresReader {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = $1
            ORDER BY table_name
        "#;

        let rows = self.conn.client().query(query, &[&schema]).await?;
        let tables: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
        debug!("Found {} base tables in schema '{}'", tables.len(), schema);
        Ok(tables)
    }

    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let query = r#"
            SELECT
                a.attname::text,
                a.attnum::int4,
                pg_catalog.format_type(a.atttypid, a.atttypmod),
                pg_catalog.pg_get_expr(d.adbin, d.adrelid),
                a.attidentity IN ('a', 'd') AS is_identity,
                a.attgenerated = 's' AS is_generated,
                CASE WHEN a.attidentity IN ('a', 'd') THEN
                    pg_catalog.pg_get_serial_sequence(
                        format('%I.%I', n.nspname, c.relname), a.attname)
                END AS identity_sequence
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_attrdef d
                   ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1
              AND c.relname = $2
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;

        let rows = self.conn.client().query(query, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                ordinal_pos: row.get(1),
                data_type: row.get(2),
                default_expr: row.get(3),
                is_identity: row.get(4),
                is_generated: row.get(5),
                identity_sequence: row.get(6),
            })
            .collect())
    }

    async fn list_foreign_keys(&self, schema: &str) -> Result<Vec<DependencyEdge>> {
        let query = r#"
            SELECT DISTINCT t.relname::text, rt.relname::text
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
            JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
            WHERE c.contype = 'f'
              AND n.nspname = $1
              AND rn.nspname = $1
            ORDER BY 1, 2
        "#;

        let rows = self.conn.client().query(query, &[&schema]).await?;
        let edges: Vec<DependencyEdge> = rows
            .iter()
            .map(|row| DependencyEdge::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect();
        debug!("Loaded {} foreign keys for {}", edges.len(), schema);
        Ok(edges)
    }
}

#[async_trait]
impl SourceReader for PostgresReader {
    async fn open_cursor(&self, schema: &str, table: &str, columns: &[String]) -> Result<()> {
        let select = format!(
            "SELECT {} FROM {}",
            column_list_pg(columns)?,
            qualify_pg(schema, table)?
        );
        let client = self.conn.client();

        // Set before BEGIN so an interrupted open still ends its transaction on close
        self.cursor_open.store(true, Ordering::SeqCst);
        client
            .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await?;

        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            quote_pg(CURSOR_NAME)?,
            select
        );
        if let Err(e) = client.batch_execute(&declare).await {
            self.cursor_open.store(false, Ordering::SeqCst);
            if let Err(rb) = client.batch_execute("ROLLBACK").await {
                warn!("Failed to end source read transaction: {}", rb);
            }
            return Err(e.into());
        }

        debug!("Opened cursor: {}", select);
        Ok(())
    }

    async fn fetch(&self, max_rows: usize) -> Result<Batch> {
        let fetch = format!("FETCH FORWARD {} FROM {}", max_rows, quote_pg(CURSOR_NAME)?);
        let messages = self.conn.client().simple_query(&fetch).await?;

        let mut rows: Vec<Row> = Vec::with_capacity(max_rows);
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
        }

        let exhausted = rows.len() < max_rows;
        let batch = Batch::new(rows);
        Ok(if exhausted { batch.mark_final() } else { batch })
    }

    async fn close_cursor(&self) -> Result<()> {
        if self.cursor_open.swap(false, Ordering::SeqCst) {
            // Read-only: ending with ROLLBACK also works when the transaction is aborted
            self.conn.client().batch_execute("ROLLBACK").await?;
        }
        Ok(())
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
