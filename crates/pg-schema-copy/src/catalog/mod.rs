//! Table catalog: the tables, columns and sequence bindings of the source schema.

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::schema::{Column, ColumnInfo, SequenceBinding, SequenceOrigin, Table};
use crate::core::traits::SchemaIntrospector;
use crate::error::{CopyError, Result};

/// Snapshot of the source schema taken at the start of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableCatalog {
    schema: String,
    tables: Vec<Table>,
    skipped: Vec<String>,
}

impl TableCatalog {
    /// Introspect `schema` on the source.
    ///
    /// Only tables accepted by `selected` are loaded. A table with no
    /// copyable columns is logged and recorded in [`skipped`](Self::skipped)
    /// instead of failing the load.
    pub async fn load<I, F>(introspector: &I, schema: &str, selected: F) -> Result<Self>
    where
        I: SchemaIntrospector + ?Sized,
        F: Fn(&str) -> bool,
    {
        let mut names = introspector
            .list_tables(schema)
            .await
            .map_err(|e| CopyError::Catalog(format!("listing tables in {}: {}", schema, e)))?;
        names.sort();
        names.dedup();

        let mut catalog = TableCatalog {
            schema: schema.to_string(),
            ..Default::default()
        };

        for name in names.into_iter().filter(|n| selected(n)) {
            let infos = introspector.list_columns(schema, &name).await.map_err(|e| {
                CopyError::Catalog(format!("listing columns of {}.{}: {}", schema, name, e))
            })?;

            let columns = build_columns(infos);
            if columns.is_empty() {
                warn!("{}.{}: no copyable columns, skipping", schema, name);
                catalog.skipped.push(name);
                continue;
            }

            debug!("Loaded {} columns for {}.{}", columns.len(), schema, name);
            catalog.tables.push(Table {
                schema: schema.to_string(),
                name,
                columns,
            });
        }

        Ok(catalog)
    }

    /// Build a catalog from already-resolved tables.
    pub fn from_tables(schema: impl Into<String>, mut tables: Vec<Table>) -> Self {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            schema: schema.into(),
            tables,
            skipped: Vec::new(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Tables to copy, alphabetical.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Names of the tables to copy, alphabetical.
    pub fn list_tables(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Columns of `table` in ordinal order.
    pub fn list_columns(&self, table: &str) -> Option<&[Column]> {
        self.table(table).map(|t| t.columns.as_slice())
    }

    /// The sequence feeding `table.column`, if its default is sequence-derived.
    pub fn sequence_default(&self, table: &str, column: &str) -> Option<&SequenceBinding> {
        self.table(table)?
            .columns
            .iter()
            .find(|c| c.name == column)?
            .sequence
            .as_ref()
    }

    /// Tables left out because they had no copyable columns.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn build_columns(mut infos: Vec<ColumnInfo>) -> Vec<Column> {
    infos.sort_by_key(|c| c.ordinal_pos);
    infos
        .into_iter()
        // Stored generated columns are recomputed by the target and reject explicit values
        .filter(|info| !info.is_generated)
        .map(|info| {
            let sequence = sequence_binding(&info);
            Column {
                name: info.name,
                ordinal_pos: info.ordinal_pos,
                data_type: info.data_type,
                is_identity: info.is_identity,
                sequence,
            }
        })
        .collect()
}

fn sequence_binding(info: &ColumnInfo) -> Option<SequenceBinding> {
    if info.is_identity {
        return info
            .identity_sequence
            .as_ref()
            .map(|seq| SequenceBinding {
                sequence: seq.clone(),
                origin: SequenceOrigin::Identity,
            });
    }

    info.default_expr
        .as_deref()
        .and_then(parse_nextval_sequence)
        .map(|sequence| SequenceBinding {
            sequence,
            origin: SequenceOrigin::Default,
        })
}

/// Extract the sequence name from a `nextval('<name>'::regclass)` default.
///
/// The returned name is the literal's content with `''` unescaped, which
/// is exactly what `'<name>'::regclass` resolves, quoting included.
pub fn parse_nextval_sequence(default_expr: &str) -> Option<String> {
    let expr = default_expr.trim();
    let rest = expr.strip_prefix("nextval(")?;
    let rest = rest.trim_start().strip_prefix('\'')?;

    let mut name = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                name.push('\'');
                continue;
            }
            return (!name.is_empty()).then_some(name);
        }
        name.push(c);
    }

    None
}
