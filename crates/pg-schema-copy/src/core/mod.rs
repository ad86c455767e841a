//! Core types shared by the engine and the drivers.
//!
//! - [`schema`]: table, column, sequence and dependency metadata
//! - [`value`]: text-form rows and batches
//! - [`traits`]: capabilities the engine needs from each database
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{Column, ColumnInfo, DependencyEdge, SequenceBinding, SequenceOrigin, Table};
pub use traits::{ReplicationRole, SchemaIntrospector, SourceReader, TargetWriter};
pub use value::{Batch, Row};
