//! PostgreSQL driver.
//!
//! - [`PostgresReader`]: schema introspection and cursor reads on the source
//! - [`PostgresWriter`]: clearing, COPY writes, triggers and sequences on the target
//! - [`SslMode`] / [`TlsBuilder`]: TLS setup for both

mod connection;
mod reader;
mod tls;
mod writer;

pub use reader::PostgresReader;
pub use tls::{SslMode, TlsBuilder};
pub use writer::PostgresWriter;
