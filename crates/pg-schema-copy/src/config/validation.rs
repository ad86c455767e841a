//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::drivers::postgres::SslMode;
use crate::error::{CopyError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_side("source", &config.source)?;
    validate_side("target", &config.target)?;

    // Copying a schema onto itself would clear every table before reading it
    if same_database(&config.source, &config.target)
        && config.source.schema == config.target.schema
    {
        return Err(CopyError::Config(format!(
            "source and target cannot be the same database and schema ({})",
            config.source.schema
        )));
    }

    if let Some(0) = config.copy.chunk_size {
        return Err(CopyError::Config(
            "copy.chunk_size must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_side(side: &str, db: &DatabaseConfig) -> Result<()> {
    match &db.url {
        Some(url) if url.trim().is_empty() => {
            return Err(CopyError::Config(format!("{}.url cannot be empty", side)));
        }
        Some(_) => {}
        None => {
            if db.host.is_empty() {
                return Err(CopyError::Config(format!(
                    "{}.host is required (or set {}.url)",
                    side, side
                )));
            }
            if db.database.is_empty() {
                return Err(CopyError::Config(format!("{}.database is required", side)));
            }
            if db.user.is_empty() {
                return Err(CopyError::Config(format!("{}.user is required", side)));
            }
        }
    }

    if db.schema.is_empty() {
        return Err(CopyError::Config(format!("{}.schema cannot be empty", side)));
    }

    if let Some(mode) = &db.ssl_mode {
        SslMode::parse(mode)?;
    }

    Ok(())
}

fn same_database(a: &DatabaseConfig, b: &DatabaseConfig) -> bool {
    match (&a.url, &b.url) {
        (Some(x), Some(y)) => x.trim() == y.trim(),
        (None, None) => a.host == b.host && a.port == b.port && a.database == b.database,
        _ => false,
    }
}
