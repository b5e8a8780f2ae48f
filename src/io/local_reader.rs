use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{LoadError, Result};

/// Line-by-line reader over a local data file.
///
/// The file handle lives exactly as long as the reader.
pub struct LocalLineReader {
    path: PathBuf,
    reader: BufReader<File>,
    line_number: u64,
}

impl LocalLineReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|source| LoadError::ResourceNotFound {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            line_number: 0,
        })
    }

    /// Next line with its 1-based line number, terminator stripped.
    ///
    /// The outer error means the file can no longer be read. The inner one
    /// is `InvalidEncoding` for a line that is not UTF-8; reading can carry
    /// on past it.
    pub async fn next_line(&mut self) -> Result<Option<(u64, Result<String>)>> {
        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|source| LoadError::ResourceNotFound {
                path: self.path.clone(),
                source,
            })?;

        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }

        let line = String::from_utf8(buf).map_err(|source| LoadError::InvalidEncoding { source });
        Ok(Some((self.line_number, line)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
