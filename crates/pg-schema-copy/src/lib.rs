//! # pg-schema-copy
//!
//! Copies every table of one PostgreSQL schema into the same-shaped schema of
//! another database, in foreign-key dependency order.
//!
//! A run:
//!
//! - **Catalogs** the source schema (tables, columns, sequence bindings)
//! - **Orders** tables parents-first with Kahn's algorithm, appending any
//!   cycle members alphabetically
//! - **Suspends** target constraints and triggers, and always restores them
//! - **Copies** each table in its own transaction with chunked `COPY` writes,
//!   so one failing table never stops the others
//! - **Resynchronizes** sequences of successfully copied tables
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_schema_copy::{Config, PgCopyOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_schema_copy::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = PgCopyOrchestrator::connect(&config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Copied {} rows", report.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod graph;
pub mod guard;
pub mod orchestrator;
pub mod sequence;
pub mod transfer;

// Re-exports for convenience
pub use catalog::TableCatalog;
pub use config::{Config, ConstraintStrategy, CopyConfig, DatabaseConfig, FailurePolicy};
pub use crate::core::schema::{Column, DependencyEdge, Table};
pub use crate::core::traits::{ReplicationRole, SchemaIntrospector, SourceReader, TargetWriter};
pub use drivers::postgres::{PostgresReader, PostgresWriter};
pub use error::{CopyError, Result};
pub use graph::{CopyPlan, DependencyGraph};
pub use guard::ConstraintGuard;
pub use orchestrator::{
    CopyOptions, CopyOrchestrator, CopyReport, HealthCheckResult, PgCopyOrchestrator, PlannedCopy,
    RunPhase, RunStatus, TableOutcome, ValidationReport,
};
pub use sequence::{ResyncReport, SequenceResynchronizer};
pub use transfer::{BatchCopier, CopyOutcome, TransferStats};
