//! Per-table copy: clear the target table, then stream source rows into it.
//!
//! Each table is copied inside its own target transaction:
//!
//! ```text
//! BEGIN -> DELETE FROM t -> (FETCH n -> COPY n)* -> COMMIT
//! ```
//!
//! Any error rolls the transaction back and is reported as
//! [`CopyOutcome::Failed`]; it never propagates, so one broken table cannot
//! stop the rest of the run. Cancellation interrupts the statement in
//! flight rather than waiting for it to finish.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::schema::Table;
use crate::core::traits::{SourceReader, TargetWriter};
use crate::core::value::Batch;
use crate::error::{CopyError, Result};

/// Result of copying one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyOutcome {
    /// All rows committed.
    Succeeded { rows: u64 },
    /// Rolled back; the target table is as it was before the attempt.
    Failed { reason: String },
    /// Never attempted.
    Skipped { reason: String },
}

impl CopyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CopyOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CopyOutcome::Failed { .. })
    }

    pub fn rows(&self) -> u64 {
        match self {
            CopyOutcome::Succeeded { rows } => *rows,
            _ => 0,
        }
    }
}

/// Timing for one table copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Time spent fetching from the source.
    pub read_time: Duration,

    /// Time spent clearing and writing the target.
    pub write_time: Duration,

    /// Rows written.
    pub rows: u64,

    /// Chunks written.
    pub chunks: usize,
}

/// Lazy, finite sequence of row batches from one source table.
///
/// Holds at most one chunk in memory. Must be [`close`](Self::close)d.
pub struct BatchStream<'a, S: SourceReader + ?Sized> {
    reader: &'a S,
    chunk_size: usize,
    exhausted: bool,
}

impl<'a, S: SourceReader + ?Sized> BatchStream<'a, S> {
    /// Open a cursor over `columns` of `schema.table`.
    pub async fn open(
        reader: &'a S,
        schema: &str,
        table: &str,
        columns: &[String],
        chunk_size: usize,
    ) -> Result<Self> {
        reader.open_cursor(schema, table, columns).await?;
        Ok(Self {
            reader,
            chunk_size: chunk_size.max(1),
            exhausted: false,
        })
    }

    /// Next non-empty batch, or `None` once the table is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.exhausted {
            return Ok(None);
        }

        let batch = self.reader.fetch(self.chunk_size).await?;
        if batch.is_last || batch.len() < self.chunk_size {
            self.exhausted = true;
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    /// Close the cursor.
    pub async fn close(self) -> Result<()> {
        self.reader.close_cursor().await
    }
}

/// Copies single tables from source to target.
pub struct BatchCopier<'a, S: ?Sized, T: ?Sized> {
    source: &'a S,
    target: &'a T,
    source_schema: String,
    target_schema: String,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl<'a, S, T> BatchCopier<'a, S, T>
where
    S: SourceReader + ?Sized,
    T: TargetWriter + ?Sized,
{
    pub fn new(
        source: &'a S,
        target: &'a T,
        source_schema: impl Into<String>,
        target_schema: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            target,
            source_schema: source_schema.into(),
            target_schema: target_schema.into(),
            chunk_size: chunk_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Interrupt the running statement and roll back once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the contents of `table` on the target with the source's rows.
    pub async fn copy(&self, table: &Table) -> (CopyOutcome, TransferStats) {
        let mut stats = TransferStats::default();
        let columns = table.column_names();
        if columns.is_empty() {
            return (
                CopyOutcome::Skipped {
                    reason: "no copyable columns".to_string(),
                },
                stats,
            );
        }

        if let Err(e) = self.on_target(self.target.begin()).await {
            // An interrupted BEGIN may still have opened the transaction
            if matches!(e, CopyError::Cancelled) {
                if let Err(rb) = self.target.rollback().await {
                    warn!("{}: rollback failed: {}", table.name, rb);
                }
            }
            return (failed(table, &e), stats);
        }

        let result = match self.transfer(table, &columns, &mut stats).await {
            // Not interruptible: a cancelled COMMIT may still have landed
            Ok(()) => self.target.commit().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => (CopyOutcome::Succeeded { rows: stats.rows }, stats),
            Err(e) => {
                if let Err(rb) = self.target.rollback().await {
                    warn!("{}: rollback failed: {}", table.name, rb);
                }
                (failed(table, &e), stats)
            }
        }
    }

    async fn transfer(
        &self,
        table: &Table,
        columns: &[String],
        stats: &mut TransferStats,
    ) -> Result<()> {
        self.check_cancelled()?;

        let write_start = Instant::now();
        let cleared = self
            .on_target(self.target.clear_table(&self.target_schema, &table.name))
            .await?;
        stats.write_time += write_start.elapsed();
        debug!("{}: cleared {} existing rows", table.name, cleared);

        let opened = self
            .on_source(BatchStream::open(
                self.source,
                &self.source_schema,
                &table.name,
                columns,
                self.chunk_size,
            ))
            .await;
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                // A partly opened cursor still holds a read transaction
                if let Err(ce) = self.source.close_cursor().await {
                    warn!("{}: closing source cursor failed: {}", table.name, ce);
                }
                return Err(e);
            }
        };

        let streamed = self.stream_rows(table, columns, &mut stream, stats).await;
        let closed = stream.close().await;
        streamed?;
        closed
    }

    async fn stream_rows(
        &self,
        table: &Table,
        columns: &[String],
        stream: &mut BatchStream<'_, S>,
        stats: &mut TransferStats,
    ) -> Result<()> {
        loop {
            self.check_cancelled()?;

            let read_start = Instant::now();
            let batch = match self.on_source(stream.next_batch()).await? {
                Some(batch) => batch,
                None => return Ok(()),
            };
            stats.read_time += read_start.elapsed();

            let write_start = Instant::now();
            let written = self
                .on_target(self.target.write_chunk(
                    &self.target_schema,
                    &table.name,
                    columns,
                    &batch.rows,
                ))
                .await?;
            stats.write_time += write_start.elapsed();

            if written != batch.len() as u64 {
                return Err(CopyError::transfer(
                    &table.name,
                    format!("wrote {} of {} rows in chunk", written, batch.len()),
                ));
            }

            stats.rows += written;
            stats.chunks += 1;
            debug!(
                "{}: chunk {} written ({} rows total)",
                table.name, stats.chunks, stats.rows
            );
        }
    }

    /// Run a source call, abandoning it if the run is cancelled meanwhile.
    async fn on_source<R>(&self, call: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::select! {
            biased;
            result = call => result,
            _ = self.cancel.cancelled() => {
                if let Err(e) = self.source.cancel_statement().await {
                    warn!("Cancel request to source failed: {}", e);
                }
                Err(CopyError::Cancelled)
            }
        }
    }

    /// Run a target call, abandoning it if the run is cancelled meanwhile.
    async fn on_target<R>(&self, call: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::select! {
            biased;
            result = call => result,
            _ = self.cancel.cancelled() => {
                if let Err(e) = self.target.cancel_statement().await {
                    warn!("Cancel request to target failed: {}", e);
                }
                Err(CopyError::Cancelled)
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(CopyError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn failed(table: &Table, err: &CopyError) -> CopyOutcome {
    let reason = match err {
        CopyError::Cancelled => "cancelled".to_string(),
        CopyError::Transfer { message, .. } => message.clone(),
        other => other.to_string(),
    };
    warn!("{}: copy failed: {}", table.name, reason);
    CopyOutcome::Failed { reason }
}
