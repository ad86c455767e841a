//! Suspension of foreign-key and trigger enforcement on the target.
//!
//! [`ConstraintGuard::suspend`] returns a guard value that must be handed
//! back to [`ConstraintGuard::restore`]. `restore` consumes the guard, so it
//! cannot run twice, and a guard dropped without being restored logs an
//! error. Async work cannot run in `Drop`, so callers keep every exit path
//! between `suspend` and `restore` free of early returns.

use tracing::{error, info, warn};

use crate::config::ConstraintStrategy;
use crate::core::traits::{ReplicationRole, TargetWriter};
use crate::error::Result;

/// Outstanding suspension of constraint enforcement.
#[must_use = "constraints stay suspended until restore() is awaited"]
pub struct ConstraintGuard<'a, T: TargetWriter + ?Sized> {
    target: &'a T,
    strategy: ConstraintStrategy,
    schema: String,
    /// Tables whose triggers were disabled by this guard.
    disabled: Vec<String>,
    released: bool,
}

impl<'a, T: TargetWriter + ?Sized> ConstraintGuard<'a, T> {
    /// Suspend enforcement for `tables` in `schema`.
    ///
    /// With [`ConstraintStrategy::SessionReplicationRole`] a failure is
    /// returned as an error and nothing is left suspended. With
    /// [`ConstraintStrategy::TriggerToggle`] a table that cannot be toggled is
    /// logged and skipped; this never fails.
    pub async fn suspend(
        target: &'a T,
        strategy: ConstraintStrategy,
        schema: &str,
        tables: &[String],
    ) -> Result<ConstraintGuard<'a, T>> {
        let mut guard = ConstraintGuard {
            target,
            strategy,
            schema: schema.to_string(),
            disabled: Vec::new(),
            released: false,
        };

        match strategy {
            ConstraintStrategy::SessionReplicationRole => {
                if let Err(e) = target.set_replication_role(ReplicationRole::Replica).await {
                    // Nothing to undo
                    guard.released = true;
                    return Err(e);
                }
                info!("Constraint enforcement suspended (session_replication_role = replica)");
            }
            ConstraintStrategy::TriggerToggle => {
                for table in tables {
                    match target.set_triggers_enabled(schema, table, false).await {
                        Ok(()) => guard.disabled.push(table.clone()),
                        Err(e) => warn!("{}.{}: could not disable triggers: {}", schema, table, e),
                    }
                }
                info!(
                    "Triggers disabled on {}/{} tables",
                    guard.disabled.len(),
                    tables.len()
                );
            }
        }

        Ok(guard)
    }

    /// Restore enforcement. Returns false if anything could not be restored.
    ///
    /// Every table disabled by [`suspend`](Self::suspend) is re-enabled,
    /// whether or not its copy succeeded.
    pub async fn restore(mut self) -> bool {
        self.released = true;

        match self.strategy {
            ConstraintStrategy::SessionReplicationRole => {
                match self.target.set_replication_role(ReplicationRole::Origin).await {
                    Ok(()) => {
                        info!("Constraint enforcement restored (session_replication_role = origin)");
                        true
                    }
                    Err(e) => {
                        error!("Failed to restore session_replication_role: {}", e);
                        false
                    }
                }
            }
            ConstraintStrategy::TriggerToggle => {
                let mut all_restored = true;
                for table in &self.disabled {
                    if let Err(e) = self
                        .target
                        .set_triggers_enabled(&self.schema, table, true)
                        .await
                    {
                        warn!("{}.{}: could not re-enable triggers: {}", self.schema, table, e);
                        all_restored = false;
                    }
                }
                if all_restored {
                    info!("Triggers re-enabled on {} tables", self.disabled.len());
                }
                all_restored
            }
        }
    }
}

impl<T: TargetWriter + ?Sized> Drop for ConstraintGuard<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            error!(
                "Constraint guard dropped without restore ({:?}); target enforcement may still be suspended",
                self.strategy
            );
        }
    }
}
