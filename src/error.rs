//! Error types for the loader

use std::path::PathBuf;

use thiserror::Error;

use crate::db::schema::ColumnType;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Everything that can go wrong between reading a spec and committing a row
#[derive(Error, Debug)]
pub enum LoadError {
    /// Spec or data resource missing or unreadable
    #[error("Cannot read '{}': {source}", path.display())]
    ResourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed spec '{}' at line {line}: {reason}", path.display())]
    MalformedSpec {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error(
        "Row too short: column '{column}' needs the line to be at least {required} characters, got {actual}"
    )]
    RowTooShort {
        column: String,
        required: usize,
        actual: usize,
    },

    #[error("Line is not valid UTF-8: {source}")]
    InvalidEncoding {
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Cannot convert '{value}' in column '{column}' to {column_type}")]
    InvalidValue {
        column: String,
        column_type: ColumnType,
        value: String,
    },

    #[error("Failed to create table '{table}': {source}")]
    SchemaCreationFailed {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to insert into '{table}': {source}")]
    InsertFailed {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Storage connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    /// A row-level error located in its data resource
    #[error("{}:{line}: {source}", path.display())]
    AtLine {
        path: PathBuf,
        line: u64,
        #[source]
        source: Box<LoadError>,
    },
}

impl LoadError {
    /// Connection-level failures end the whole run; everything else is scoped
    /// to a row or a spec.
    pub fn is_fatal(&self) -> bool {
        match self {
            LoadError::Connection(_) => true,
            LoadError::AtLine { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Attach the data resource location to a row-level error
    pub fn at_line(self, path: impl Into<PathBuf>, line: u64) -> Self {
        LoadError::AtLine {
            path: path.into(),
            line,
            source: Box::new(self),
        }
    }

    /// Short machine-readable kind, used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::ResourceNotFound { .. } => "resource_not_found",
            LoadError::MalformedSpec { .. } => "malformed_spec",
            LoadError::RowTooShort { .. } => "row_too_short",
            LoadError::InvalidEncoding { .. } => "invalid_encoding",
            LoadError::InvalidValue { .. } => "invalid_value",
            LoadError::SchemaCreationFailed { .. } => "schema_creation_failed",
            LoadError::InsertFailed { .. } => "insert_failed",
            LoadError::Connection(_) => "connection",
            LoadError::AtLine { source, .. } => source.kind(),
        }
    }

    /// Wrap a storage error, promoting connection-level failures to `Connection`
    pub(crate) fn from_storage(
        error: sqlx::Error,
        wrap: impl FnOnce(sqlx::Error) -> LoadError,
    ) -> Self {
        if is_connection_error(&error) {
            LoadError::Connection(error)
        } else {
            wrap(error)
        }
    }
}

/// Errors that mean the storage handle itself is gone, as opposed to a
/// statement being rejected
fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
