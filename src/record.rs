//! Text record with a comma-delimited field view.
//!
//! A record is one line of text. Filters read it through [`Record::fields`],
//! which splits on [`FIELD_DELIMITER`]. Records are immutable: a filter that
//! changes content builds a new record instead of editing the old one.

use std::fmt;

/// Separator between fields in a record line.
pub const FIELD_DELIMITER: &str = ", ";

/// A single immutable text record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Record {
    line: String,
}

impl Record {
    /// Create a record from a line of text.
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    /// Build a record by joining fields with [`FIELD_DELIMITER`].
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut line = String::new();
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                line.push_str(FIELD_DELIMITER);
            }
            line.push_str(field.as_ref());
        }
        Self { line }
    }

    /// The full line.
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Consume the record, returning its line.
    pub fn into_string(self) -> String {
        self.line
    }

    /// Length of the line in bytes.
    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Parsed field view.
    ///
    /// Splitting never fails: a line without any delimiter is a single field,
    /// and joining the fields back with [`FIELD_DELIMITER`] reproduces the
    /// line byte for byte.
    pub fn fields(&self) -> Vec<&str> {
        self.line.split(FIELD_DELIMITER).collect()
    }

    pub fn field_count(&self) -> usize {
        self.line.split(FIELD_DELIMITER).count()
    }

    /// Field at `index` (0-based), if present.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.line.split(FIELD_DELIMITER).nth(index)
    }

    /// Copy of this record with field `index` replaced.
    ///
    /// Returns `None` when the record has no such field.
    pub fn with_field(&self, index: usize, value: &str) -> Option<Record> {
        let mut fields = self.fields();
        let slot = fields.get_mut(index)?;
        *slot = value;
        Some(Record::from_fields(fields))
    }

    /// Copy of this record with every occurrence of `from` replaced by `to`.
    pub fn replace(&self, from: &str, to: &str) -> Record {
        Record::new(self.line.replace(from, to))
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.line.contains(pattern)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl From<&str> for Record {
    fn from(line: &str) -> Self {
        Record::new(line)
    }
}

impl From<String> for Record {
    fn from(line: String) -> Self {
        Record::new(line)
    }
}

impl AsRef<str> for Record {
    fn as_ref(&self) -> &str {
        &self.line
    }
}
