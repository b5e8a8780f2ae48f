use crate::db::schema::SqlValue;
use crate::error::{LoadError, Result};
use crate::formats::spec::ColumnDef;

/// One decoded field: a trimmed slice of the source line and its column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<'a> {
    pub column: &'a ColumnDef,
    pub value: &'a str,
}

impl Field<'_> {
    /// Literal token for this field (`'text'` or a bare token)
    pub fn literal(&self) -> String {
        self.column.column_type.format_literal(self.value)
    }

    /// Typed value to bind to the insert statement
    pub fn to_sql_value(&self) -> Result<SqlValue> {
        self.column
            .column_type
            .to_sql_value(self.value)
            .ok_or_else(|| LoadError::InvalidValue {
                column: self.column.name.clone(),
                column_type: self.column.column_type,
                value: self.value.to_string(),
            })
    }
}

/// A decoded line, one field per column in spec order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord<'a> {
    pub fields: Vec<Field<'a>>,
}

impl DataRecord<'_> {
    pub fn literals(&self) -> Vec<String> {
        self.fields.iter().map(Field::literal).collect()
    }

    pub fn to_sql_values(&self) -> Result<Vec<SqlValue>> {
        self.fields.iter().map(Field::to_sql_value).collect()
    }
}

/// Slice `line` into one trimmed field per column.
///
/// Widths count characters, not bytes. Content past the last column is
/// ignored; a line that ends before the last column does is an error.
pub fn decode_record<'a>(columns: &'a [ColumnDef], line: &'a str) -> Result<DataRecord<'a>> {
    let mut rest = line;
    let mut required = 0usize;
    let mut fields = Vec::with_capacity(columns.len());

    for column in columns {
        required += column.width;

        let (raw, tail) =
            split_at_char(rest, column.width).ok_or_else(|| LoadError::RowTooShort {
                column: column.name.clone(),
                required,
                actual: line.chars().count(),
            })?;

        fields.push(Field {
            column,
            value: raw.trim(),
        });
        rest = tail;
    }

    Ok(DataRecord { fields })
}

/// Decode a line into literal tokens ready for display in an INSERT
pub fn decode(columns: &[ColumnDef], line: &str) -> Result<Vec<String>> {
    Ok(decode_record(columns, line)?.literals())
}

/// Split after `n` characters, or `None` if `s` is shorter than that
fn split_at_char(s: &str, n: usize) -> Option<(&str, &str)> {
    match s.char_indices().nth(n) {
        Some((idx, _)) => Some(s.split_at(idx)),
        None if s.chars().count() == n => Some((s, "")),
        None => None,
    }
}
