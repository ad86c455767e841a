//! Identifier validation and quoting for dynamically built SQL.
//!
//! Table, column and schema names cannot be bound as statement parameters,
//! so every name that reaches generated SQL goes through [`quote_pg`] or
//! [`qualify_pg`]. Names come from the source catalog, but may contain
//! quotes, spaces or mixed case, and must round trip unchanged.

use crate::error::{CopyError, Result};

/// PostgreSQL truncates identifiers at `NAMEDATALEN - 1` bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier before it is embedded in SQL.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes
/// - Identifiers exceeding PostgreSQL's maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CopyError::Identifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(CopyError::Identifier(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CopyError::Identifier(format!(
            "identifier exceeds {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a table name with its schema: `"schema"."table"`.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote and comma-join a column list.
pub fn column_list_pg(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table").is_ok());
        assert!(validate_identifier("Table123").is_ok());
        assert!(validate_identifier("order items").is_ok());
    }

    #[test]
    fn test_validate_identifier_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_identifier_null_byte() {
        assert!(validate_identifier("users\0; DROP TABLE x").is_err());
    }

    #[test]
    fn test_validate_identifier_too_long() {
        let at_limit = "a".repeat(63);
        assert!(validate_identifier(&at_limit).is_ok());
        let too_long = "a".repeat(64);
        assert!(validate_identifier(&too_long).is_err());
    }

    #[test]
    fn test_quote_pg() {
        assert_eq!(quote_pg("users").unwrap(), "\"users\"");
        assert_eq!(quote_pg("Users").unwrap(), "\"Users\"");
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
        assert_eq!(
            quote_pg("x\"; DROP TABLE users; --").unwrap(),
            "\"x\"\"; DROP TABLE users; --\""
        );
    }

    #[test]
    fn test_qualify_pg() {
        assert_eq!(
            qualify_pg("public", "orders").unwrap(),
            "\"public\".\"orders\""
        );
        assert!(qualify_pg("", "orders").is_err());
    }

    #[test]
    fn test_column_list_pg() {
        let cols = vec!["id".to_string(), "Customer Id".to_string()];
        assert_eq!(column_list_pg(&cols).unwrap(), "\"id\", \"Customer Id\"");
    }
}
