//! Copy orchestrator - coordinates a full schema copy.
//!
//! A run moves through a fixed sequence of phases:
//!
//! ```text
//! Idle -> CatalogLoaded -> PlanBuilt -> ConstraintsSuspended -> Copying
//!      -> ConstraintsRestored -> SequencesResynced -> Done
//! ```
//!
//! Errors before `ConstraintsSuspended` abort the run. From then on the
//! copy phase cannot fail as a whole: per-table failures are recorded, the
//! constraint guard is always restored, and sequences are resynchronized for
//! the tables that made it.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::TableCatalog;
use crate::config::{Config, CopyConfig, FailurePolicy};
use crate::core::traits::{SchemaIntrospector, SourceReader, TargetWriter};
use crate::drivers::postgres::{PostgresReader, PostgresWriter};
use crate::error::{CopyError, Result};
use crate::graph::{CopyPlan, DependencyGraph};
use crate::guard::ConstraintGuard;
use crate::sequence::{ResyncReport, SequenceResynchronizer};
use crate::transfer::{BatchCopier, CopyOutcome, TransferStats};

/// Phase of a copy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    CatalogLoaded,
    PlanBuilt,
    ConstraintsSuspended,
    Copying,
    ConstraintsRestored,
    SequencesResynced,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::CatalogLoaded => "catalog loaded",
            RunPhase::PlanBuilt => "plan built",
            RunPhase::ConstraintsSuspended => "constraints suspended",
            RunPhase::Copying => "copying",
            RunPhase::ConstraintsRestored => "constraints restored",
            RunPhase::SequencesResynced => "sequences resynced",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Forward-only phase tracking for one run.
#[derive(Debug, Default)]
struct PhaseTracker {
    phase: RunPhase,
}

impl PhaseTracker {
    fn advance(&mut self, next: RunPhase) {
        debug_assert!(next > self.phase, "phase {} after {}", next, self.phase);
        debug!("Phase: {} -> {}", self.phase, next);
        self.phase = next;
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table copied.
    Completed,
    /// Ran to the end, but some tables failed.
    CompletedWithFailures,
    /// Stopped after a failed table under [`FailurePolicy::Abort`].
    Aborted,
    /// Interrupted by the cancellation token.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithFailures => "completed with failures",
            RunStatus::Aborted => "aborted",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of one table in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub table: String,
    #[serde(flatten)]
    pub outcome: CopyOutcome,
    pub duration_ms: u64,

    /// Chunks written.
    pub chunks: usize,

    /// Time spent fetching from the source.
    pub read_ms: u64,

    /// Time spent clearing and writing the target.
    pub write_ms: u64,
}

impl TableOutcome {
    fn copied(table: &str, outcome: CopyOutcome, stats: &TransferStats, duration_ms: u64) -> Self {
        Self {
            table: table.to_string(),
            outcome,
            duration_ms,
            chunks: stats.chunks,
            read_ms: stats.read_time.as_millis() as u64,
            write_ms: stats.write_time.as_millis() as u64,
        }
    }

    fn skipped(table: &str, reason: impl Into<String>) -> Self {
        Self::copied(
            table,
            CopyOutcome::Skipped {
                reason: reason.into(),
            },
            &TransferStats::default(),
            0,
        )
    }
}

/// Result of a copy run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// Last phase reached.
    pub phase: RunPhase,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Copy order.
    pub plan: Vec<String>,

    /// Tables ordered by the cycle fallback.
    pub unresolved: Vec<String>,

    /// Per-table outcomes, in copy order.
    pub tables: Vec<TableOutcome>,

    pub tables_total: usize,
    pub tables_succeeded: usize,
    pub tables_failed: usize,
    pub tables_skipped: usize,

    /// Total rows copied.
    pub rows_copied: u64,

    /// Names of the tables that failed.
    pub failed_tables: Vec<String>,

    /// Whether constraint enforcement was fully restored.
    pub constraints_restored: bool,

    pub sequences: ResyncReport,
}

impl CopyReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Names of the tables that copied successfully.
    pub fn succeeded_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.outcome.is_success())
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn outcome(&self, table: &str) -> Option<&CopyOutcome> {
        self.tables
            .iter()
            .find(|t| t.table == table)
            .map(|t| &t.outcome)
    }

    /// Map the report onto the process result.
    ///
    /// Cancellation is always an error. Failed tables are an error only
    /// when `fail_on_partial` is set; otherwise the run counts as completed
    /// with warnings.
    pub fn check(&self, fail_on_partial: bool) -> Result<()> {
        if self.status == RunStatus::Cancelled {
            return Err(CopyError::Cancelled);
        }
        if fail_on_partial && !self.failed_tables.is_empty() {
            return Err(CopyError::PartialFailure {
                failed: self.failed_tables.clone(),
            });
        }
        Ok(())
    }
}

/// Catalog and copy order, without touching the target.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedCopy {
    pub catalog: TableCatalog,
    pub plan: CopyPlan,
}

/// Row counts of one table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowCountCheck {
    pub table: String,
    pub source_rows: i64,
    /// `None` when the target could not be counted.
    pub target_rows: Option<i64>,
}

impl RowCountCheck {
    pub fn matches(&self) -> bool {
        self.target_rows == Some(self.source_rows)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub tables: Vec<RowCountCheck>,
}

impl ValidationReport {
    pub fn all_match(&self) -> bool {
        self.tables.iter().all(RowCountCheck::matches)
    }

    pub fn mismatched(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| !t.matches())
            .map(|t| t.table.as_str())
            .collect()
    }
}

/// Connection health of both sides.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Settings the orchestrator needs from the configuration.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub source_schema: String,
    pub target_schema: String,
    pub copy: CopyConfig,
}

impl CopyOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_schema: config.source.schema.clone(),
            target_schema: config.target.schema.clone(),
            copy: config.copy.clone(),
        }
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            source_schema: "public".to_string(),
            target_schema: "public".to_string(),
            copy: CopyConfig::default(),
        }
    }
}

/// Copies a whole schema from `source` to `target`.
pub struct CopyOrchestrator<S, T> {
    source: S,
    target: T,
    options: CopyOptions,
}

/// Orchestrator over live PostgreSQL connections.
pub type PgCopyOrchestrator = CopyOrchestrator<PostgresReader, PostgresWriter>;

impl PgCopyOrchestrator {
    /// Open the source and target connections described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let source = PostgresReader::connect(&config.source).await?;
        let target = PostgresWriter::connect(&config.target).await?;
        Ok(Self::new(source, target, CopyOptions::from_config(config)))
    }
}

impl<S, T> CopyOrchestrator<S, T>
where
    S: SchemaIntrospector + SourceReader,
    T: TargetWriter,
{
    pub fn new(source: S, target: T, options: CopyOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Load the catalog and compute the copy order. Never touches the target.
    pub async fn plan(&self) -> Result<PlannedCopy> {
        self.build_plan(&mut PhaseTracker::default()).await
    }

    async fn build_plan(&self, phase: &mut PhaseTracker) -> Result<PlannedCopy> {
        info!("Phase 1: Loading catalog of schema {}", self.options.source_schema);
        let copy = &self.options.copy;
        let catalog = TableCatalog::load(&self.source, &self.options.source_schema, |name| {
            copy.is_table_selected(name)
        })
        .await?;
        info!(
            "Found {} tables ({} skipped)",
            catalog.len(),
            catalog.skipped().len()
        );
        phase.advance(RunPhase::CatalogLoaded);

        info!("Phase 2: Ordering tables by foreign-key dependencies");
        let graph = DependencyGraph::load(&self.source, &catalog).await?;
        let plan = graph.topological_order();
        if !plan.is_fully_ordered() {
            warn!(
                "Circular foreign keys: {} tables ordered alphabetically instead: {:?}",
                plan.unresolved.len(),
                plan.unresolved
            );
        }
        info!("Copy order: {:?}", plan.order);
        phase.advance(RunPhase::PlanBuilt);

        Ok(PlannedCopy { catalog, plan })
    }

    /// Run the full copy.
    ///
    /// Returns an error only when the run cannot start (catalog, plan or
    /// constraint suspension failed, or cancelled before copying began).
    /// Everything after that is reported through [`CopyReport`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<CopyReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut phase = PhaseTracker::default();

        info!("Starting copy run {}", run_id);

        let PlannedCopy { catalog, plan } = self.build_plan(&mut phase).await?;

        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        info!("Phase 3: Suspending constraint enforcement");
        let guard = ConstraintGuard::suspend(
            &self.target,
            self.options.copy.constraint_strategy,
            &self.options.target_schema,
            &plan.order,
        )
        .await?;
        phase.advance(RunPhase::ConstraintsSuspended);

        info!("Phase 4: Copying {} tables", plan.len());
        phase.advance(RunPhase::Copying);
        let (mut outcomes, stopped_early) = self.copy_tables(&catalog, &plan, &cancel).await;

        info!("Phase 5: Restoring constraint enforcement");
        let constraints_restored = guard.restore().await;
        phase.advance(RunPhase::ConstraintsRestored);

        let sequences = if self.options.copy.resync_sequences {
            info!("Phase 6: Resynchronizing sequences");
            let succeeded = outcomes
                .iter()
                .filter(|o| o.outcome.is_success())
                .filter_map(|o| catalog.table(&o.table));
            SequenceResynchronizer::new(&self.target, &self.options.target_schema)
                .resync(succeeded)
                .await
        } else {
            info!("Phase 6: Sequence resync disabled");
            ResyncReport::default()
        };
        phase.advance(RunPhase::SequencesResynced);

        for name in catalog.skipped() {
            outcomes.push(TableOutcome::skipped(name, "no copyable columns"));
        }

        phase.advance(RunPhase::Done);

        let failed_tables: Vec<String> = outcomes
            .iter()
            .filter(|o| o.outcome.is_failure())
            .map(|o| o.table.clone())
            .collect();

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if stopped_early {
            RunStatus::Aborted
        } else if !failed_tables.is_empty() {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };

        let report = CopyReport {
            run_id,
            status,
            phase: phase.phase,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            tables_total: outcomes.len(),
            tables_succeeded: outcomes.iter().filter(|o| o.outcome.is_success()).count(),
            tables_failed: failed_tables.len(),
            tables_skipped: outcomes
                .iter()
                .filter(|o| matches!(o.outcome, CopyOutcome::Skipped { .. }))
                .count(),
            rows_copied: outcomes.iter().map(|o| o.outcome.rows()).sum(),
            plan: plan.order,
            unresolved: plan.unresolved,
            tables: outcomes,
            failed_tables,
            constraints_restored,
            sequences,
        };

        info!(
            "Copy run {}: {} ({}/{} tables, {} rows, {:.2}s)",
            report.run_id,
            report.status,
            report.tables_succeeded,
            report.tables_total,
            report.rows_copied,
            report.duration_seconds
        );
        if !report.failed_tables.is_empty() {
            warn!("Failed tables: {:?}", report.failed_tables);
        }

        Ok(report)
    }

    /// Copy every planned table in order. Returns the outcomes and whether
    /// the loop stopped before the end of the plan.
    async fn copy_tables(
        &self,
        catalog: &TableCatalog,
        plan: &CopyPlan,
        cancel: &CancellationToken,
    ) -> (Vec<TableOutcome>, bool) {
        let copier = BatchCopier::new(
            &self.source,
            &self.target,
            &self.options.source_schema,
            &self.options.target_schema,
            self.options.copy.get_chunk_size(),
        )
        .with_cancellation(cancel.clone());

        let total = plan.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut stop_reason: Option<String> = None;

        for (i, name) in plan.iter().enumerate() {
            if let Some(reason) = &stop_reason {
                outcomes.push(TableOutcome::skipped(name, reason.clone()));
                continue;
            }

            if cancel.is_cancelled() {
                stop_reason = Some("cancelled".to_string());
                outcomes.push(TableOutcome::skipped(name, "cancelled"));
                continue;
            }

            let Some(table) = catalog.table(name) else {
                continue;
            };

            let started = Instant::now();
            let (outcome, stats) = copier.copy(table).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                CopyOutcome::Succeeded { rows } => info!(
                    "[{}/{}] {}: {} rows in {} chunks ({:.2}s, read {:.2}s, write {:.2}s)",
                    i + 1,
                    total,
                    name,
                    rows,
                    stats.chunks,
                    duration_ms as f64 / 1000.0,
                    stats.read_time.as_secs_f64(),
                    stats.write_time.as_secs_f64()
                ),
                CopyOutcome::Failed { reason } => {
                    warn!("[{}/{}] {}: FAILED: {}", i + 1, total, name, reason);
                    if self.options.copy.failure_policy == FailurePolicy::Abort {
                        stop_reason = Some(format!("run aborted after {} failed", name));
                    }
                }
                CopyOutcome::Skipped { reason } => {
                    info!("[{}/{}] {}: skipped: {}", i + 1, total, name, reason)
                }
            }

            outcomes.push(TableOutcome::copied(name, outcome, &stats, duration_ms));
        }

        let stopped_early = stop_reason.is_some();
        (outcomes, stopped_early)
    }

    /// Compare row counts between source and target for every catalog table.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let copy = &self.options.copy;
        let catalog = TableCatalog::load(&self.source, &self.options.source_schema, |name| {
            copy.is_table_selected(name)
        })
        .await?;

        let mut report = ValidationReport::default();
        for table in catalog.tables() {
            let source_rows = self
                .source
                .row_count(&self.options.source_schema, &table.name)
                .await?;
            let target_rows = match self
                .target
                .row_count(&self.options.target_schema, &table.name)
                .await
            {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!("{}: could not count target rows: {}", table.name, e);
                    None
                }
            };

            let check = RowCountCheck {
                table: table.name.clone(),
                source_rows,
                target_rows,
            };
            if check.matches() {
                info!("{}: {} rows (match)", table.name, source_rows);
            } else {
                warn!(
                    "{}: source={} target={:?} (MISMATCH)",
                    table.name, source_rows, target_rows
                );
            }
            report.tables.push(check);
        }

        Ok(report)
    }

    /// Ping both connections.
    pub async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = started.elapsed().as_millis() as u64;

        HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            target_connected: target.is_ok(),
            target_latency_ms,
            healthy: source.is_ok() && target.is_ok(),
            source_error: source.err().map(|e| e.to_string()),
            target_error: target.err().map(|e| e.to_string()),
        }
    }
}
