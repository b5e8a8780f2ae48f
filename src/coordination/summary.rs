use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::LoadError;

/// Record of an error that occurred during processing
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Line in the data file, when the error belongs to a row
    pub line_number: Option<u64>,
    pub error_type: String,
    pub error_message: String,
}

impl From<&LoadError> for ErrorRecord {
    fn from(error: &LoadError) -> Self {
        let line_number = match error {
            LoadError::AtLine { line, .. } => Some(*line),
            LoadError::MalformedSpec { line, .. } => Some(*line),
            _ => None,
        };

        Self {
            line_number,
            error_type: error.kind().to_string(),
            error_message: error.to_string(),
        }
    }
}

/// Outcome of loading one data file
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub path: PathBuf,
    pub status: String, // "success", "partial", "failed"
    pub records_loaded: u64,
    pub records_failed: u64,
    pub started_at: String,   // ISO 8601
    pub completed_at: String, // ISO 8601
    pub duration_ms: u64,
    pub errors: Vec<ErrorRecord>,
}

impl FileResult {
    /// Record the error that ended reading early. Rows committed before it
    /// still count, so the file is `partial` rather than `failed` when any
    /// landed.
    pub(crate) fn stopped_by(&mut self, error: &LoadError) {
        self.errors.push(ErrorRecord::from(error));
        self.status = status_for(self.records_loaded, self.records_failed + 1).to_string();
    }
}

/// Outcome of processing one spec file and its data files
#[derive(Debug, Clone, Serialize)]
pub struct SpecResult {
    pub spec_path: PathBuf,
    /// Target table, once the spec parsed
    pub table: Option<String>,
    pub table_created: bool,
    pub status: String, // "success", "partial", "failed"
    pub files: Vec<FileResult>,
    /// Error that stopped this spec before or during table synchronization
    pub error: Option<ErrorRecord>,
}

impl SpecResult {
    pub fn records_loaded(&self) -> u64 {
        self.files.iter().map(|f| f.records_loaded).sum()
    }

    pub fn records_failed(&self) -> u64 {
        self.files.iter().map(|f| f.records_failed).sum()
    }

    /// Roll the file outcomes up into a status for the whole spec
    pub(crate) fn finish(&mut self) {
        self.status = if self.error.is_some() {
            "failed"
        } else if self.files.iter().all(|f| f.status == "success") {
            "success"
        } else if self.files.iter().all(|f| f.status == "failed") {
            "failed"
        } else {
            "partial"
        }
        .to_string();
    }
}

/// Result of a completed load run
#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub run_id: String,
    pub specs_processed: usize,
    pub specs_failed: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub records_loaded: u64,
    pub records_failed: u64,
    pub duration: Duration,
    pub spec_results: Vec<SpecResult>,
}

impl LoadResult {
    /// True when every spec, file, and row loaded
    pub fn is_clean(&self) -> bool {
        self.specs_failed == 0
            && self
                .spec_results
                .iter()
                .flat_map(|s| &s.files)
                .all(|f| f.status == "success")
    }
}

/// Status label from loaded/failed counts
pub(crate) fn status_for(loaded: u64, failed: u64) -> &'static str {
    match (loaded, failed) {
        (_, 0) => "success",
        (0, _) => "failed",
        _ => "partial",
    }
}

/// Write the run summary as pretty-printed JSON
pub async fn write_summary(path: &Path, result: &LoadResult) -> Result<()> {
    let json = serde_json::to_vec_pretty(result).context("Failed to serialize run summary")?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .context("Failed to create summary directory")?;
    }

    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create summary file '{}'", path.display()))?;
    file.write_all(&json).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_result() -> LoadResult {
        LoadResult {
            run_id: "run".to_string(),
            specs_processed: 1,
            specs_failed: 0,
            files_processed: 1,
            files_failed: 0,
            records_loaded: 2,
            records_failed: 1,
            duration: Duration::from_millis(1500),
            spec_results: vec![SpecResult {
                spec_path: PathBuf::from("spec/t.csv"),
                table: Some("t".to_string()),
                table_created: true,
                status: "partial".to_string(),
                files: vec![FileResult {
                    path: PathBuf::from("data/t_1.txt"),
                    status: "partial".to_string(),
                    records_loaded: 2,
                    records_failed: 1,
                    started_at: "2015-06-28T00:00:00+00:00".to_string(),
                    completed_at: "2015-06-28T00:00:01+00:00".to_string(),
                    duration_ms: 1000,
                    errors: vec![ErrorRecord::from(
                        &LoadError::RowTooShort {
                            column: "count".to_string(),
                            required: 14,
                            actual: 3,
                        }
                        .at_line("data/t_1.txt", 2),
                    )],
                }],
                error: None,
            }],
        }
    }

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(5, 0), "success");
        assert_eq!(status_for(0, 0), "success");
        assert_eq!(status_for(0, 2), "failed");
        assert_eq!(status_for(3, 2), "partial");
    }

    #[test]
    fn test_error_record_from_located_error() {
        let result = sample_result();
        let record = &result.spec_results[0].files[0].errors[0];
        assert_eq!(record.line_number, Some(2));
        assert_eq!(record.error_type, "row_too_short");
        assert!(record.error_message.starts_with("data/t_1.txt:2:"));
    }

    #[test]
    fn test_spec_totals() {
        let result = sample_result();
        assert_eq!(result.spec_results[0].records_loaded(), 2);
        assert_eq!(result.spec_results[0].records_failed(), 1);
        assert!(!result.is_clean());
    }

    #[test]
    fn test_file_stopped_early_keeps_loaded_rows() {
        let mut result = sample_result();
        let file = &mut result.spec_results[0].files[0];
        file.records_failed = 0;
        file.errors.clear();

        let read_error = LoadError::ResourceNotFound {
            path: PathBuf::from("data/t_1.txt"),
            source: std::io::Error::other("disk went away"),
        };
        file.stopped_by(&read_error);
        assert_eq!(file.status, "partial");
        assert_eq!(file.errors[0].error_type, "resource_not_found");
        assert!(!result.is_clean());

        let file = &mut result.spec_results[0].files[0];
        file.records_loaded = 0;
        file.stopped_by(&read_error);
        assert_eq!(file.status, "failed");
    }

    #[test]
    fn test_spec_status_rolls_up_files() {
        let mut spec = sample_result().spec_results.remove(0);
        spec.finish();
        assert_eq!(spec.status, "partial");

        spec.files[0].status = "success".to_string();
        spec.finish();
        assert_eq!(spec.status, "success");

        spec.error = Some(ErrorRecord::from(&LoadError::MalformedSpec {
            path: PathBuf::from("spec/t.csv"),
            line: 2,
            reason: "bad width".to_string(),
        }));
        spec.finish();
        assert_eq!(spec.status, "failed");
    }

    #[tokio::test]
    async fn test_write_summary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("summary.json");

        write_summary(&path, &sample_result()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["records_loaded"], 2);
        assert_eq!(json["spec_results"][0]["table"], "t");
        assert_eq!(
            json["spec_results"][0]["files"][0]["errors"][0]["line_number"],
            2
        );
    }
}
