//! Table, column and dependency metadata.
//!
//! Everything here is discovered fresh from the source at the start of a run
//! and never mutated afterwards.

use serde::Serialize;

/// A base table selected for copying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    /// Schema the table was discovered in.
    pub schema: String,

    /// Table name, unique within the schema.
    pub name: String,

    /// Copyable columns in ordinal order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Column names in the order they are read and written.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns whose values come from a sequence.
    pub fn sequence_columns(&self) -> impl Iterator<Item = (&Column, &SequenceBinding)> {
        self.columns
            .iter()
            .filter_map(|c| c.sequence.as_ref().map(|s| (c, s)))
    }
}

/// A copyable column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub ordinal_pos: i32,
    pub data_type: String,
    pub is_identity: bool,

    /// Sequence that supplies this column's default value, if any.
    pub sequence: Option<SequenceBinding>,
}

/// Link between a column and the sequence that feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceBinding {
    /// Sequence name as PostgreSQL renders it, usable with `::regclass`.
    pub sequence: String,
    pub origin: SequenceOrigin,
}

/// How a column came to be sequence-backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOrigin {
    /// `DEFAULT nextval('...')`, typically from `serial`/`bigserial`.
    Default,
    /// `GENERATED ... AS IDENTITY`.
    Identity,
}

/// Raw column metadata as reported by a [`SchemaIntrospector`].
///
/// [`SchemaIntrospector`]: crate::core::traits::SchemaIntrospector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub ordinal_pos: i32,
    pub data_type: String,

    /// Column default expression, e.g. `nextval('orders_id_seq'::regclass)`.
    pub default_expr: Option<String>,

    pub is_identity: bool,

    /// `GENERATED ALWAYS AS (...) STORED`; recomputed by the target.
    pub is_generated: bool,

    /// Owning sequence of an identity column.
    pub identity_sequence: Option<String>,
}

/// A foreign-key dependency: `dependent` has a foreign key into `referenced`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DependencyEdge {
    pub dependent: String,
    pub referenced: String,
}

impl DependencyEdge {
    pub fn new(dependent: impl Into<String>, referenced: impl Into<String>) -> Self {
        Self {
            dependent: dependent.into(),
            referenced: referenced.into(),
        }
    }

    /// A table referencing itself.
    pub fn is_self_reference(&self) -> bool {
        self.dependent == self.referenced
    }
}
