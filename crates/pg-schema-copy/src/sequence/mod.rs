//! Sequence resynchronization after a copy.
//!
//! Copied rows carry their original key values, so every sequence feeding a
//! copied column is moved past the largest value now in the target.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::schema::Table;
use crate::core::traits::TargetWriter;

/// A sequence moved to its column's maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncedSequence {
    pub table: String,
    pub column: String,
    pub sequence: String,
    pub value: i64,
}

/// A sequence that could not be resynchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSequence {
    pub table: String,
    pub column: String,
    pub sequence: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub resynced: Vec<ResyncedSequence>,
    pub failed: Vec<FailedSequence>,
}

impl ResyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Moves target sequences to match copied data.
pub struct SequenceResynchronizer<'a, T: TargetWriter + ?Sized> {
    target: &'a T,
    schema: String,
}

impl<'a, T: TargetWriter + ?Sized> SequenceResynchronizer<'a, T> {
    pub fn new(target: &'a T, schema: impl Into<String>) -> Self {
        Self {
            target,
            schema: schema.into(),
        }
    }

    /// Resynchronize every sequence-backed column of `tables`.
    ///
    /// Callers pass only tables whose copy succeeded. A failure on one
    /// column is logged and recorded; the remaining columns still run.
    pub async fn resync<'t, I>(&self, tables: I) -> ResyncReport
    where
        I: IntoIterator<Item = &'t Table>,
    {
        let mut report = ResyncReport::default();

        for table in tables {
            for (column, binding) in table.sequence_columns() {
                match self
                    .target
                    .resync_sequence(&self.schema, &table.name, &column.name, &binding.sequence)
                    .await
                {
                    Ok(value) => {
                        debug!(
                            "{}.{}: sequence {} set to {}",
                            table.name, column.name, binding.sequence, value
                        );
                        report.resynced.push(ResyncedSequence {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            sequence: binding.sequence.clone(),
                            value,
                        });
                    }
                    Err(e) => {
                        warn!(
                            "{}.{}: could not resync sequence {}: {}",
                            table.name, column.name, binding.sequence, e
                        );
                        report.failed.push(FailedSequence {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            sequence: binding.sequence.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "Sequences resynchronized: {} ok, {} failed",
            report.resynced.len(),
            report.failed.len()
        );
        report
    }
}
