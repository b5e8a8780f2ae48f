use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LoadError, Result};

/// File name filter used to find spec and data resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePattern {
    prefix: String,
    suffix: String,
}

impl ResourcePattern {
    /// Every file with the given extension (no leading dot)
    pub fn with_extension(extension: &str) -> Self {
        Self {
            prefix: String::new(),
            suffix: format!(".{}", extension),
        }
    }

    /// Files whose name starts with `prefix` and has the given extension
    pub fn with_prefix(prefix: &str, extension: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: format!(".{}", extension),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.len() >= self.prefix.len() + self.suffix.len()
            && file_name.starts_with(&self.prefix)
            && file_name.ends_with(&self.suffix)
    }
}

/// List the regular files in `dir` matching `pattern`, sorted by file name
/// so runs do not depend on directory listing order.
pub async fn discover(dir: &Path, pattern: &ResourcePattern) -> Result<Vec<PathBuf>> {
    let not_found = |source| LoadError::ResourceNotFound {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(not_found)?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(not_found)? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };

        if !pattern.matches(file_name) {
            continue;
        }

        if entry.file_type().await.map_err(not_found)?.is_file() {
            found.push(entry.path());
        }
    }

    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}
