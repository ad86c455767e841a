//! Database driver implementations of the [`crate::core::traits`] capabilities.

pub mod postgres;

pub use postgres::{PostgresReader, PostgresWriter, SslMode, TlsBuilder};
