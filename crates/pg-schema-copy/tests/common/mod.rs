//! In-memory source and target databases for engine tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pg_schema_copy::core::schema::{ColumnInfo, DependencyEdge};
use pg_schema_copy::core::value::{Batch, Row};
use pg_schema_copy::{
    CopyError, ReplicationRole, Result, SchemaIntrospector, SourceReader, TargetWriter,
};
use tokio_util::sync::CancellationToken;

fn injected(what: impl Into<String>) -> CopyError {
    CopyError::Validation(format!("injected failure: {}", what.into()))
}

/// `n` rows of `(id, name)` with ids starting at 1.
pub fn id_name_rows(n: usize) -> Vec<Row> {
    (1..=n)
        .map(|i| vec![Some(i.to_string()), Some(format!("name {}", i))])
        .collect()
}

pub fn column(name: &str, pos: i32) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        ordinal_pos: pos,
        data_type: "text".to_string(),
        ..Default::default()
    }
}

/// A `serial`-style column fed by `nextval('<sequence>'::regclass)`.
pub fn serial_column(name: &str, pos: i32, sequence: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        ordinal_pos: pos,
        data_type: "integer".to_string(),
        default_expr: Some(format!("nextval('{}'::regclass)", sequence)),
        ..Default::default()
    }
}

pub fn generated_column(name: &str, pos: i32) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        ordinal_pos: pos,
        data_type: "integer".to_string(),
        is_generated: true,
        ..Default::default()
    }
}

struct SourceTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct SourceState {
    tables: BTreeMap<String, SourceTable>,
    fks: Vec<DependencyEdge>,
    cursor: Option<VecDeque<Row>>,
    fetch_sizes: Vec<usize>,
    cursors_opened: usize,
    cursors_closed: usize,
    fail_fetch_on: HashSet<String>,
    current_table: Option<String>,
    ping_fails: bool,
}

/// In-memory source schema.
#[derive(Default)]
pub struct MockSource {
    state: Mutex<SourceState>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap()
    }

    /// Add a table with its full column list and rows (one value per column).
    pub fn table(self, name: &str, columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        self.lock()
            .tables
            .insert(name.to_string(), SourceTable { columns, rows });
        self
    }

    /// Add an `(id, name)` table with `n` rows.
    pub fn simple_table(self, name: &str, n: usize) -> Self {
        self.table(
            name,
            vec![column("id", 1), column("name", 2)],
            id_name_rows(n),
        )
    }

    pub fn fk(self, dependent: &str, referenced: &str) -> Self {
        self.lock().fks.push(DependencyEdge::new(dependent, referenced));
        self
    }

    pub fn fail_fetch_on(self, table: &str) -> Self {
        self.lock().fail_fetch_on.insert(table.to_string());
        self
    }

    pub fn ping_fails(self) -> Self {
        self.lock().ping_fails = true;
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.lock().fetch_sizes.clone()
    }

    pub fn cursor_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.cursors_opened, state.cursors_closed)
    }

    pub fn cursor_is_open(&self) -> bool {
        self.lock().cursor.is_some()
    }
}

#[async_trait]
impl SchemaIntrospector for MockSource {
    async fn list_tables(&self, _schema: &str) -> Result<Vec<String>> {
        Ok(self.lock().tables.keys().cloned().collect())
    }

    async fn list_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| CopyError::Catalog(format!("no such table {}", table)))
    }

    async fn list_foreign_keys(&self, _schema: &str) -> Result<Vec<DependencyEdge>> {
        Ok(self.lock().fks.clone())
    }
}

#[async_trait]
impl SourceReader for MockSource {
    async fn open_cursor(&self, _schema: &str, table: &str, columns: &[String]) -> Result<()> {
        let mut state = self.lock();
        assert!(state.cursor.is_none(), "cursor already open");

        let source = state
            .tables
            .get(table)
            .ok_or_else(|| CopyError::Catalog(format!("no such table {}", table)))?;
        let positions: Vec<usize> = columns
            .iter()
            .map(|name| {
                source
                    .columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| injected(format!("unknown column {}", name)))
            })
            .collect::<Result<_>>()?;
        let projected: VecDeque<Row> = source
            .rows
            .iter()
            .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
            .collect();

        state.cursor = Some(projected);
        state.current_table = Some(table.to_string());
        state.cursors_opened += 1;
        Ok(())
    }

    async fn fetch(&self, max_rows: usize) -> Result<Batch> {
        let mut state = self.lock();
        state.fetch_sizes.push(max_rows);

        if let Some(table) = &state.current_table {
            if state.fail_fetch_on.contains(table) {
                return Err(injected(format!("fetch from {}", table)));
            }
        }

        let cursor = state
            .cursor
            .as_mut()
            .ok_or_else(|| injected("fetch without cursor"))?;
        let take = max_rows.min(cursor.len());
        let rows: Vec<Row> = cursor.drain(..take).collect();

        let exhausted = rows.len() < max_rows;
        let batch = Batch::new(rows);
        Ok(if exhausted { batch.mark_final() } else { batch })
    }

    async fn close_cursor(&self) -> Result<()> {
        let mut state = self.lock();
        if state.cursor.take().is_some() {
            state.cursors_closed += 1;
        }
        state.current_table = None;
        Ok(())
    }

    async fn row_count(&self, _schema: &str, table: &str) -> Result<i64> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| CopyError::Catalog(format!("no such table {}", table)))
    }

    async fn ping(&self) -> Result<()> {
        if self.lock().ping_fails {
            return Err(CopyError::connection("connection refused", "ping source"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    pub last_value: i64,
    pub is_called: bool,
}

#[derive(Clone, Default)]
struct TargetTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct TargetState {
    tables: BTreeMap<String, TargetTable>,
    snapshot: Option<BTreeMap<String, TargetTable>>,
    sequences: HashMap<String, SequenceState>,
    events: Vec<String>,
    chunks: Vec<(String, usize)>,
    role: Option<ReplicationRole>,
    triggers_disabled: HashSet<String>,
    fail_clear_on: HashSet<String>,
    fail_write_on: HashSet<String>,
    slow_write_on: HashMap<String, Duration>,
    fail_trigger_toggle_on: HashSet<String>,
    fail_enable_triggers_on: HashSet<String>,
    fail_role: Option<ReplicationRole>,
    fail_resync_on: HashSet<String>,
    cancel_after_write: Option<(String, CancellationToken)>,
    cancel_requests: usize,
    ping_fails: bool,
}

/// In-memory target schema with transactional tables.
#[derive(Default)]
pub struct MockTarget {
    state: Mutex<TargetState>,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap()
    }

    /// Pre-existing rows on the target.
    pub fn with_rows(self, table: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        self.lock().tables.insert(
            table.to_string(),
            TargetTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
        self
    }

    pub fn with_sequence(self, name: &str, last_value: i64, is_called: bool) -> Self {
        self.lock().sequences.insert(
            name.to_string(),
            SequenceState {
                last_value,
                is_called,
            },
        );
        self
    }

    pub fn fail_clear_on(self, table: &str) -> Self {
        self.lock().fail_clear_on.insert(table.to_string());
        self
    }

    pub fn fail_write_on(self, table: &str) -> Self {
        self.lock().fail_write_on.insert(table.to_string());
        self
    }

    /// Every chunk written to `table` takes `delay` before it lands.
    pub fn slow_write_on(self, table: &str, delay: Duration) -> Self {
        self.lock().slow_write_on.insert(table.to_string(), delay);
        self
    }

    /// Fail both disabling and re-enabling triggers on `table`.
    pub fn fail_trigger_toggle_on(self, table: &str) -> Self {
        self.lock().fail_trigger_toggle_on.insert(table.to_string());
        self
    }

    /// Disabling triggers on `table` works; re-enabling them fails.
    pub fn fail_enable_triggers_on(self, table: &str) -> Self {
        self.lock().fail_enable_triggers_on.insert(table.to_string());
        self
    }

    pub fn fail_role(self, role: ReplicationRole) -> Self {
        self.lock().fail_role = Some(role);
        self
    }

    pub fn fail_resync_on(self, sequence: &str) -> Self {
        self.lock().fail_resync_on.insert(sequence.to_string());
        self
    }

    /// Fire `token` right after the first chunk of `table` is written.
    pub fn cancel_after_write(self, table: &str, token: CancellationToken) -> Self {
        self.lock().cancel_after_write = Some((table.to_string(), token));
        self
    }

    pub fn ping_fails(self) -> Self {
        self.lock().ping_fails = true;
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// `(table, rows)` of every chunk written, in order.
    pub fn chunks(&self) -> Vec<(String, usize)> {
        self.lock().chunks.clone()
    }

    pub fn chunk_sizes(&self, table: &str) -> Vec<usize> {
        self.lock()
            .chunks
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, n)| *n)
            .collect()
    }

    /// Tables in the order they were first written to.
    pub fn write_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for (table, _) in self.lock().chunks.iter() {
            if !order.contains(table) {
                order.push(table.clone());
            }
        }
        order
    }

    pub fn role(&self) -> Option<ReplicationRole> {
        self.lock().role
    }

    pub fn triggers_disabled(&self) -> HashSet<String> {
        self.lock().triggers_disabled.clone()
    }

    /// Number of statement cancel requests received.
    pub fn cancel_requests(&self) -> usize {
        self.lock().cancel_requests
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().snapshot.is_some()
    }

    pub fn sequence(&self, name: &str) -> Option<SequenceState> {
        self.lock().sequences.get(name).copied()
    }

    /// PostgreSQL `nextval` semantics.
    pub fn nextval(&self, name: &str) -> i64 {
        let mut state = self.lock();
        let seq = state.sequences.entry(name.to_string()).or_insert(SequenceState {
            last_value: 1,
            is_called: false,
        });
        if seq.is_called {
            seq.last_value += 1;
        }
        seq.is_called = true;
        seq.last_value
    }
}

#[async_trait]
impl TargetWriter for MockTarget {
    async fn begin(&self) -> Result<()> {
        let mut state = self.lock();
        assert!(state.snapshot.is_none(), "nested transaction");
        state.snapshot = Some(state.tables.clone());
        state.events.push("begin".to_string());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.lock();
        state.snapshot = None;
        state.events.push("commit".to_string());
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        state.events.push("rollback".to_string());
        Ok(())
    }

    async fn clear_table(&self, _schema: &str, table: &str) -> Result<u64> {
        let mut state = self.lock();
        if state.fail_clear_on.contains(table) {
            return Err(injected(format!("clear {}", table)));
        }
        state.events.push(format!("clear:{}", table));
        let removed = state
            .tables
            .get_mut(table)
            .map(|t| std::mem::take(&mut t.rows).len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }

    async fn write_chunk(
        &self,
        _schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let delay = self.lock().slow_write_on.get(table).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        assert!(state.snapshot.is_some(), "write outside transaction");

        if state.fail_write_on.contains(table) {
            return Err(injected(format!("write to {}", table)));
        }

        let entry = state.tables.entry(table.to_string()).or_default();
        entry.columns = columns.to_vec();
        entry.rows.extend(rows.iter().cloned());
        state.chunks.push((table.to_string(), rows.len()));
        state.events.push(format!("write:{}:{}", table, rows.len()));

        if let Some((cancel_table, token)) = &state.cancel_after_write {
            if cancel_table == table {
                token.cancel();
            }
        }

        Ok(rows.len() as u64)
    }

    async fn set_replication_role(&self, role: ReplicationRole) -> Result<()> {
        let mut state = self.lock();
        if state.fail_role == Some(role) {
            return Err(injected(format!("set role {}", role.as_str())));
        }
        state.role = Some(role);
        state.events.push(format!("role:{}", role.as_str()));
        Ok(())
    }

    async fn set_triggers_enabled(&self, _schema: &str, table: &str, enabled: bool) -> Result<()> {
        let mut state = self.lock();
        if state.fail_trigger_toggle_on.contains(table) {
            return Err(injected(format!("toggle triggers on {}", table)));
        }
        if enabled && state.fail_enable_triggers_on.contains(table) {
            return Err(injected(format!("enable triggers on {}", table)));
        }
        if enabled {
            state.triggers_disabled.remove(table);
        } else {
            state.triggers_disabled.insert(table.to_string());
        }
        state.events.push(format!(
            "triggers:{}:{}",
            table,
            if enabled { "on" } else { "off" }
        ));
        Ok(())
    }

    async fn resync_sequence(
        &self,
        _schema: &str,
        table: &str,
        column: &str,
        sequence: &str,
    ) -> Result<i64> {
        let mut state = self.lock();
        if state.fail_resync_on.contains(sequence) {
            return Err(injected(format!("resync {}", sequence)));
        }

        let max = state.tables.get(table).and_then(|t| {
            let idx = t.columns.iter().position(|c| c == column)?;
            t.rows
                .iter()
                .filter_map(|r| r[idx].as_deref().and_then(|v| v.parse::<i64>().ok()))
                .max()
        });

        let seq = match max {
            Some(m) => SequenceState {
                last_value: m,
                is_called: true,
            },
            None => SequenceState {
                last_value: 1,
                is_called: false,
            },
        };
        state.sequences.insert(sequence.to_string(), seq);
        state.events.push(format!("resync:{}", sequence));
        Ok(seq.last_value)
    }

    async fn row_count(&self, _schema: &str, table: &str) -> Result<i64> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| injected(format!("no such table {}", table)))
    }

    async fn ping(&self) -> Result<()> {
        if self.lock().ping_fails {
            return Err(CopyError::connection("connection refused", "ping target"));
        }
        Ok(())
    }

    async fn cancel_statement(&self) -> Result<()> {
        let mut state = self.lock();
        state.cancel_requests += 1;
        state.events.push("cancel".to_string());
        Ok(())
    }
}
