use serde::Serialize;
use std::path::Path;

use crate::db::schema::ColumnType;
use crate::error::{LoadError, Result};

/// One column of a fixed-width layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    /// Characters this column occupies in every data line
    pub width: usize,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: &str, width: usize, column_type: ColumnType) -> Self {
        Self {
            name: name.to_owned(),
            width,
            column_type,
        }
    }
}

/// Parsed specification file: the table name and its ordered columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatSpec {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl FormatSpec {
    /// Read and parse a spec file. The table name is the file name with the
    /// spec `extension` stripped.
    pub async fn from_path(path: &Path, extension: &str) -> Result<Self> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| LoadError::ResourceNotFound {
                path: path.to_path_buf(),
                source,
            })?;

        Self::parse(spec_name(path, extension), path, &content)
    }

    /// Parse spec content. The first line is a header and is skipped; every
    /// other non-blank line must be `name,width,type`.
    pub fn parse(name: impl Into<String>, path: &Path, content: &[u8]) -> Result<Self> {
        let malformed = |line: u64, reason: String| LoadError::MalformedSpec {
            path: path.to_path_buf(),
            line,
            reason,
        };

        // The first physical line is the header, whatever it holds. The csv
        // reader would skip a blank one and take the first column as header.
        let body = match content.iter().position(|&b| b == b'\n') {
            Some(idx) => &content[idx + 1..],
            None => &[][..],
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body);

        let mut columns = Vec::new();

        for result in reader.records() {
            let record = result.map_err(|e| {
                let line = e.position().map(|p| p.line() + 1).unwrap_or(0);
                malformed(line, e.to_string())
            })?;
            let line = record.position().map(|p| p.line() + 1).unwrap_or(0);

            if record.iter().all(str::is_empty) {
                continue;
            }

            if record.len() != 3 {
                return Err(malformed(
                    line,
                    format!(
                        "expected 3 comma-separated fields (name,width,type), found {}",
                        record.len()
                    ),
                ));
            }

            let (col_name, width, type_name) = (&record[0], &record[1], &record[2]);

            if col_name.is_empty() {
                return Err(malformed(line, "column name is empty".to_string()));
            }

            let width = match width.parse::<usize>() {
                Ok(w) if w > 0 => w,
                _ => {
                    return Err(malformed(
                        line,
                        format!("width '{}' is not a positive integer", width),
                    ));
                }
            };

            let column_type = type_name
                .parse::<ColumnType>()
                .map_err(|reason| malformed(line, reason))?;

            columns.push(ColumnDef::new(col_name, width, column_type));
        }

        if columns.is_empty() {
            return Err(malformed(1, "no column definitions after the header line".to_string()));
        }

        Ok(FormatSpec {
            name: name.into(),
            columns,
        })
    }

    /// Characters a data line needs to hold every column
    pub fn line_width(&self) -> usize {
        self.columns.iter().map(|c| c.width).sum()
    }
}

/// Derive the table name from a spec file path
pub fn spec_name(path: &Path, extension: &str) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{}", extension);

    match file_name.strip_suffix(&suffix) {
        Some(stem) => stem.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(file_name),
    }
}
