//! Row and batch representation.
//!
//! Values travel in PostgreSQL's text representation exactly as the source
//! server rendered them. The target server parses them back with the
//! column's own input function, so no client-side type conversion happens.

/// One row: a text value per column, `None` for SQL NULL.
pub type Row = Vec<Option<String>>;

/// A chunk of rows read from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Rows in this batch.
    pub rows: Vec<Row>,

    /// Whether the source has no rows after this batch.
    pub is_last: bool,
}

impl Batch {
    /// Create a new batch with the given rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            is_last: false,
        }
    }

    /// Mark this as the final batch.
    pub fn mark_final(mut self) -> Self {
        self.is_last = true;
        self
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Encode one row as a line of `COPY ... (FORMAT text)` input.
///
/// NULL becomes `\N`; backslash, tab, newline and carriage return are
/// backslash-escaped. The line is terminated with `\n`.
pub fn encode_copy_row(row: &[Option<String>], out: &mut String) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        match value {
            None => out.push_str("\\N"),
            Some(text) => escape_copy_text(text, out),
        }
    }
    out.push('\n');
}

fn escape_copy_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_basics() {
        let batch = Batch::new(vec![vec![Some("1".into())], vec![None]]);
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(!batch.is_last);
        assert!(batch.mark_final().is_last);

        let last = Batch::new(Vec::new()).mark_final();
        assert!(last.is_empty());
        assert!(last.is_last);
    }

    #[test]
    fn test_encode_null_distinct_from_empty() {
        let mut out = String::new();
        encode_copy_row(&[None, Some(String::new()), Some("x".into())], &mut out);
        assert_eq!(out, "\\N\t\tx\n");
    }

    #[test]
    fn test_encode_escapes_specials() {
        let mut out = String::new();
        encode_copy_row(&[Some("a\tb\nc\rd\\e".into())], &mut out);
        assert_eq!(out, "a\\tb\\nc\\rd\\\\e\n");
    }

    #[test]
    fn test_encode_literal_backslash_n_is_not_null() {
        let mut out = String::new();
        encode_copy_row(&[Some("\\N".into())], &mut out);
        assert_eq!(out, "\\\\N\n");
    }

    #[test]
    fn test_encode_bytea_hex_survives() {
        // bytea_output = hex renders as \x...; the backslash must be doubled
        let mut out = String::new();
        encode_copy_row(&[Some("\\xdeadbeef".into()), Some("héllo".into())], &mut out);
        assert_eq!(out, "\\\\xdeadbeef\théllo\n");
    }
}
