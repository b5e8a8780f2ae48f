use anyhow::{Result, anyhow};
use std::path::PathBuf;
use url::Url;

use super::pool::Backend;

/// Where rows are loaded to, parsed from the `--connection` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Plain filesystem path to a SQLite database (created if missing)
    SqliteFile(PathBuf),
    /// `sqlite:` URL, including `sqlite::memory:`
    SqliteUrl(String),
    /// `postgres://` or `postgresql://` URL
    Postgres(String),
}

impl ConnectionTarget {
    /// Parse a connection string into a ConnectionTarget
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(anyhow!("Connection target is empty"));
        }

        // Try parsing as URL first
        match Url::parse(target) {
            Ok(url) => match url.scheme() {
                "sqlite" => Ok(ConnectionTarget::SqliteUrl(target.to_string())),
                "postgres" | "postgresql" => {
                    if url.host_str().is_none_or(str::is_empty) {
                        return Err(anyhow!("PostgreSQL URL missing host: {}", target));
                    }
                    Ok(ConnectionTarget::Postgres(target.to_string()))
                }
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow!("Invalid file:// URI: {}", target))?;
                    Ok(ConnectionTarget::SqliteFile(path))
                }
                scheme => Err(anyhow!(
                    "Unsupported connection scheme: {}. Use a file path, sqlite:, or postgres://",
                    scheme
                )),
            },
            // Treat as local database file path
            Err(_) => Ok(ConnectionTarget::SqliteFile(PathBuf::from(target))),
        }
    }

    /// SQL dialect this target speaks, known without connecting
    pub fn backend(&self) -> Backend {
        match self {
            ConnectionTarget::SqliteFile(_) | ConnectionTarget::SqliteUrl(_) => Backend::Sqlite,
            ConnectionTarget::Postgres(_) => Backend::Postgres,
        }
    }
}
