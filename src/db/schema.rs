use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::pool::{Backend, Pool};
use crate::error::{LoadError, Result};
use crate::formats::FormatSpec;

/// Logical column type declared in a spec file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Boolean,
    Integer,
    Real,
}

impl ColumnType {
    /// Returns the type name as written in spec files and SQLite DDL
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// Render the column type for a CREATE TABLE statement.
    ///
    /// SQLite keeps the declared width as a type parameter on every column
    /// (`INTEGER(3)`); it is ignored by the engine but documents the layout.
    /// PostgreSQL rejects a length on most types, so there the width only
    /// survives on text columns as `VARCHAR(width)`.
    pub fn to_ddl(&self, width: usize, backend: Backend) -> String {
        match backend {
            Backend::Sqlite => format!("{}({})", self.as_str(), width),
            Backend::Postgres => match self {
                ColumnType::Text => format!("VARCHAR({})", width),
                ColumnType::Boolean => "BOOLEAN".to_string(),
                ColumnType::Integer => "BIGINT".to_string(),
                ColumnType::Real => "DOUBLE PRECISION".to_string(),
            },
        }
    }

    /// Format a trimmed field as a SQL literal token. Text is wrapped in
    /// single quotes without escaping; this form is for display only.
    pub fn format_literal(&self, value: &str) -> String {
        match self {
            ColumnType::Text => format!("'{}'", value),
            _ => value.to_string(),
        }
    }

    /// Coerce a trimmed field into a bindable value. Empty fields become NULL.
    /// Returns `None` when the text cannot be coerced to this type.
    pub fn to_sql_value(&self, value: &str) -> Option<SqlValue> {
        if value.is_empty() {
            return Some(SqlValue::Null(*self));
        }

        match self {
            ColumnType::Text => Some(SqlValue::Text(value.to_string())),
            ColumnType::Integer => value.parse::<i64>().ok().map(SqlValue::Integer),
            ColumnType::Real => value.parse::<f64>().ok().map(SqlValue::Real),
            ColumnType::Boolean => parse_bool(value).map(SqlValue::Boolean),
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TEXT" => Ok(ColumnType::Text),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "INTEGER" | "INT" => Ok(ColumnType::Integer),
            "REAL" => Ok(ColumnType::Real),
            other => Err(format!(
                "Unknown column type '{}'. Supported types: TEXT, BOOLEAN, INTEGER, REAL",
                other
            )),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" => Some(true),
        "0" | "f" | "false" | "n" | "no" => Some(false),
        _ => None,
    }
}

/// A typed value ready to be bound to an insert statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    /// NULL carrying the column type so the driver can bind a typed NULL
    Null(ColumnType),
}

/// Outcome of synchronizing a spec with storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub name: String,
    pub created: bool,
}

/// Quote an identifier so free-form spec names cannot break out of it
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Generate the CREATE TABLE statement for a spec
pub fn generate_ddl(spec: &FormatSpec, backend: Backend) -> String {
    let column_defs: Vec<String> = spec
        .columns
        .iter()
        .map(|col| {
            format!(
                "{} {}",
                quote_identifier(&col.name),
                col.column_type.to_ddl(col.width, backend)
            )
        })
        .collect();

    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(&spec.name),
        column_defs.join(", ")
    )
}

/// Generate the parameterized INSERT statement executed for every row
pub fn generate_insert(spec: &FormatSpec, backend: Backend) -> String {
    let placeholders: Vec<String> = (1..=spec.columns.len())
        .map(|idx| backend.placeholder(idx))
        .collect();

    format!(
        "INSERT INTO {} VALUES ({})",
        quote_identifier(&spec.name),
        placeholders.join(", ")
    )
}

/// Render an INSERT with inline literal tokens. Never executed; used to show
/// what a row looks like in logs and dry runs.
pub fn render_literal_insert(table: &str, tokens: &[String]) -> String {
    format!("INSERT INTO '{}' VALUES ({})", table, tokens.join(", "))
}

/// Make sure the table for `spec` exists, creating it if it doesn't.
///
/// Never alters an existing table. Safe to call any number of times.
pub async fn ensure_table(pool: &Pool, spec: &FormatSpec) -> Result<TableStatus> {
    let schema_error = |source| LoadError::SchemaCreationFailed {
        table: spec.name.clone(),
        source,
    };

    let exists = pool
        .table_exists(&spec.name)
        .await
        .map_err(|e| LoadError::from_storage(e, schema_error))?;

    if exists {
        info!(table = %spec.name, "Table already exists");
        return Ok(TableStatus {
            name: spec.name.clone(),
            created: false,
        });
    }

    let ddl = generate_ddl(spec, pool.backend());
    info!(table = %spec.name, %ddl, "Creating table");

    match pool.execute_query(&ddl).await {
        Ok(()) => Ok(TableStatus {
            name: spec.name.clone(),
            created: true,
        }),
        // Lost a race with another process creating the same table
        Err(e) if e.to_string().contains("already exists") => {
            info!(table = %spec.name, "Table already exists, continuing...");
            Ok(TableStatus {
                name: spec.name.clone(),
                created: false,
            })
        }
        Err(e) => Err(LoadError::from_storage(e, schema_error)),
    }
}
