use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

use super::summary::{ErrorRecord, FileResult, status_for};
use crate::config::ERROR_PREVIEW_CHARS;
use crate::db::schema::render_literal_insert;
use crate::db::{Pool, SqlValue};
use crate::error::{LoadError, Result};
use crate::formats::{FormatSpec, decode_record};
use crate::io::LocalLineReader;
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// What to do when a single row cannot be decoded or inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowErrorPolicy {
    /// Record the failure and keep loading
    #[default]
    Continue,
    /// Stop the whole run at the first failure
    Abort,
}

/// Rows decoded but not yet committed, with their source line numbers
#[derive(Debug, Default)]
struct PendingBatch {
    lines: Vec<u64>,
    rows: Vec<Vec<SqlValue>>,
}

impl PendingBatch {
    fn push(&mut self, line: u64, row: Vec<SqlValue>) {
        self.lines.push(line);
        self.rows.push(row);
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.rows.clear();
    }
}

/// Everything a worker needs to load data files for one spec
pub struct FileLoad<'a> {
    pub spec: &'a FormatSpec,
    pub insert_sql: &'a str,
}

/// Worker that loads data files into the synchronized table
pub struct Worker {
    pub pool: Pool,
    pub batch_size: usize,
    pub on_row_error: RowErrorPolicy,
    pub quiet: bool,
}

impl Worker {
    pub fn new(pool: Pool, batch_size: usize, on_row_error: RowErrorPolicy, quiet: bool) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            on_row_error,
            quiet,
        }
    }

    /// Load every non-empty line of `path` into the spec's table.
    ///
    /// Row failures are collected in the returned `FileResult` unless the
    /// policy is `Abort`. Connection failures are always returned as `Err`.
    pub async fn load_file(
        &self,
        load: &FileLoad<'_>,
        path: &Path,
        stats: &mut ProgressStats,
    ) -> Result<FileResult> {
        stats.update(&TelemetryEvent::FileStarted);
        let started_at = Utc::now();
        let start_instant = Instant::now();

        info!(file = %path.display(), table = %load.spec.name, "Loading data file");

        let mut result = FileResult {
            path: path.to_path_buf(),
            status: String::new(),
            records_loaded: 0,
            records_failed: 0,
            started_at: started_at.to_rfc3339(),
            completed_at: String::new(),
            duration_ms: 0,
            errors: Vec::new(),
        };

        let progress = self.progress_bar(path);
        let outcome = self
            .load_lines(load, path, &mut result, stats, &progress)
            .await;
        progress.finish_and_clear();

        stats.update(&TelemetryEvent::FileCompleted);
        result.completed_at = Utc::now().to_rfc3339();
        result.duration_ms = start_instant.elapsed().as_millis() as u64;
        result.status = status_for(result.records_loaded, result.records_failed).to_string();

        match outcome {
            Ok(()) => {
                info!(
                    file = %path.display(),
                    records_loaded = result.records_loaded,
                    records_failed = result.records_failed,
                    "Data file complete"
                );
                Ok(result)
            }
            Err(e) if e.is_fatal() || self.on_row_error == RowErrorPolicy::Abort => Err(e),
            // Data file missing or unreadable
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Data file failed");
                result.stopped_by(&e);
                Ok(result)
            }
        }
    }

    async fn load_lines(
        &self,
        load: &FileLoad<'_>,
        path: &Path,
        result: &mut FileResult,
        stats: &mut ProgressStats,
        progress: &ProgressBar,
    ) -> Result<()> {
        let mut reader = LocalLineReader::open(path).await?;
        let mut batch = PendingBatch::default();

        loop {
            let next = match reader.next_line().await {
                Ok(next) => next,
                Err(e) => {
                    // Keep what was decoded before the read error
                    self.flush(load, reader.path(), &mut batch, result, stats, progress)
                        .await?;
                    return Err(e);
                }
            };
            let Some((line_number, line)) = next else {
                break;
            };

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    let e = e.at_line(reader.path(), line_number);
                    self.record_failure(e, None, result, stats)?;
                    continue;
                }
            };

            if line.is_empty() {
                continue;
            }

            let decoded = decode_record(&load.spec.columns, &line).and_then(|record| {
                trace!(
                    line = line_number,
                    sql = %render_literal_insert(&load.spec.name, &record.literals()),
                    "Decoded row"
                );
                record.to_sql_values()
            });

            match decoded {
                Ok(values) => {
                    batch.push(line_number, values);
                    if batch.len() >= self.batch_size {
                        self.flush(load, reader.path(), &mut batch, result, stats, progress)
                            .await?;
                    }
                }
                Err(e) => {
                    let e = e.at_line(reader.path(), line_number);
                    self.record_failure(e, Some(&line), result, stats)?;
                }
            }
        }

        self.flush(load, reader.path(), &mut batch, result, stats, progress)
            .await
    }

    /// Commit the pending rows in one transaction.
    ///
    /// If the transaction is rejected and the policy is `Continue`, the rows
    /// are replayed one transaction each so only the offending rows are lost.
    async fn flush(
        &self,
        load: &FileLoad<'_>,
        path: &Path,
        batch: &mut PendingBatch,
        result: &mut FileResult,
        stats: &mut ProgressStats,
        progress: &ProgressBar,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        match self.commit(load, &batch.rows, result, stats, progress).await {
            Ok(()) => {}
            Err((row, e)) => {
                if e.is_fatal() {
                    return Err(e);
                }

                let failed_line = batch.lines[row.unwrap_or(0)];
                if self.on_row_error == RowErrorPolicy::Abort || batch.len() == 1 {
                    self.record_failure(e.at_line(path, failed_line), None, result, stats)?;
                } else {
                    warn!(
                        file = %path.display(),
                        line = failed_line,
                        rows = batch.len(),
                        "Batch rejected, retrying rows individually"
                    );
                    for (line, row) in batch.lines.iter().zip(&batch.rows) {
                        if let Err((_, e)) = self
                            .commit(load, std::slice::from_ref(row), result, stats, progress)
                            .await
                        {
                            if e.is_fatal() {
                                return Err(e);
                            }
                            self.record_failure(e.at_line(path, *line), None, result, stats)?;
                        }
                    }
                }
            }
        }

        batch.clear();
        Ok(())
    }

    /// Insert rows in a single transaction and account for them
    async fn commit(
        &self,
        load: &FileLoad<'_>,
        rows: &[Vec<SqlValue>],
        result: &mut FileResult,
        stats: &mut ProgressStats,
        progress: &ProgressBar,
    ) -> std::result::Result<(), (Option<usize>, LoadError)> {
        let start = Instant::now();

        self.pool
            .insert_batch(load.insert_sql, rows)
            .await
            .map_err(|e| {
                let error = LoadError::from_storage(e.source, |source| LoadError::InsertFailed {
                    table: load.spec.name.clone(),
                    source,
                });
                (e.row, error)
            })?;

        let records_loaded = rows.len() as u64;
        result.records_loaded += records_loaded;
        stats.update(&TelemetryEvent::BatchCommitted {
            records_loaded,
            duration_ms: start.elapsed().as_millis() as u64,
        });
        progress.inc(records_loaded);
        Ok(())
    }

    /// Apply the row error policy to a located row failure
    fn record_failure(
        &self,
        error: LoadError,
        raw_line: Option<&str>,
        result: &mut FileResult,
        stats: &mut ProgressStats,
    ) -> Result<()> {
        if self.on_row_error == RowErrorPolicy::Abort || error.is_fatal() {
            return Err(error);
        }

        match raw_line {
            Some(raw) => warn!(error = %error, line_preview = %preview(raw), "Skipping row"),
            None => warn!(error = %error, "Skipping row"),
        }

        result.records_failed += 1;
        result.errors.push(ErrorRecord::from(&error));
        stats.update(&TelemetryEvent::RecordFailed);
        Ok(())
    }

    fn progress_bar(&self, path: &Path) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} {msg}: {human_pos} rows | {per_sec}")
        {
            bar.set_style(style);
        }
        bar.set_message(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

/// Shorten a raw line for log output
fn preview(raw: &str) -> String {
    if raw.chars().count() > ERROR_PREVIEW_CHARS {
        let head: String = raw.chars().take(ERROR_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{ColumnType, ensure_table, generate_insert};
    use crate::formats::spec::ColumnDef;
    use tempfile::TempDir;

    fn testformat1() -> FormatSpec {
        FormatSpec {
            name: "testformat1".to_string(),
            columns: vec![
                ColumnDef::new("name", 10, ColumnType::Text),
                ColumnDef::new("valid", 1, ColumnType::Boolean),
                ColumnDef::new("count", 3, ColumnType::Integer),
            ],
        }
    }

    async fn setup() -> (Pool, FormatSpec, String) {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let spec = testformat1();
        ensure_table(&pool, &spec).await.unwrap();
        let insert_sql = generate_insert(&spec, pool.backend());
        (pool, spec, insert_sql)
    }

    fn write_data(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn names(pool: &Pool) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM testformat1 ORDER BY rowid")
            .fetch_all(pool.as_sqlite().unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"x".repeat(30)), format!("{}...", "x".repeat(20)));
    }

    #[tokio::test]
    async fn test_load_file_per_row_commit() {
        let (pool, spec, insert_sql) = setup().await;
        let dir = TempDir::new().unwrap();
        let path = write_data(
            &dir,
            "testformat1_2015-06-28.txt",
            "Foonyor   1103\nBarzane   0  7\n\nQuuxitude 1 12\n",
        );

        let worker = Worker::new(pool.clone(), 1, RowErrorPolicy::Continue, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let result = worker.load_file(&load, &path, &mut stats).await.unwrap();

        assert_eq!(result.records_loaded, 3);
        assert_eq!(result.records_failed, 0);
        assert_eq!(result.status, "success");
        assert_eq!(stats.commit_durations_ms.len(), 3);
        assert_eq!(names(&pool).await, vec!["Foonyor", "Barzane", "Quuxitude"]);
    }

    #[tokio::test]
    async fn test_load_file_continue_skips_bad_rows() {
        let (pool, spec, insert_sql) = setup().await;
        let dir = TempDir::new().unwrap();
        let path = write_data(
            &dir,
            "testformat1_bad.txt",
            "Foonyor   1103\nshort\nBarzane   x  7\nQuuxitude 1 12\n",
        );

        let worker = Worker::new(pool.clone(), 10, RowErrorPolicy::Continue, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let result = worker.load_file(&load, &path, &mut stats).await.unwrap();

        assert_eq!(result.records_loaded, 2);
        assert_eq!(result.records_failed, 2);
        assert_eq!(result.status, "partial");
        assert_eq!(result.errors[0].line_number, Some(2));
        assert_eq!(result.errors[0].error_type, "row_too_short");
        assert_eq!(result.errors[1].line_number, Some(3));
        assert_eq!(result.errors[1].error_type, "invalid_value");
        assert_eq!(stats.records_failed, 2);
        assert_eq!(names(&pool).await, vec!["Foonyor", "Quuxitude"]);
    }

    #[tokio::test]
    async fn test_load_file_abort_keeps_committed_prefix() {
        let (pool, spec, insert_sql) = setup().await;
        let dir = TempDir::new().unwrap();
        let path = write_data(
            &dir,
            "testformat1_abort.txt",
            "Foonyor   1103\nBarzane   0  7\nshort\nQuuxitude 1 12\n",
        );

        let worker = Worker::new(pool.clone(), 1, RowErrorPolicy::Abort, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let err = worker
            .load_file(&load, &path, &mut stats)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::AtLine { line: 3, .. }));
        assert_eq!(names(&pool).await, vec!["Foonyor", "Barzane"]);
    }

    #[tokio::test]
    async fn test_rejected_batch_is_replayed_row_by_row() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let spec = testformat1();
        pool.execute_query(
            "CREATE TABLE testformat1 (name TEXT, valid BOOLEAN, count INTEGER CHECK (count < 100))",
        )
        .await
        .unwrap();
        let insert_sql = generate_insert(&spec, pool.backend());
        let dir = TempDir::new().unwrap();
        let path = write_data(
            &dir,
            "testformat1_check.txt",
            "Foonyor   1103\nBarzane   0  7\nQuuxitude 1 12\n",
        );

        let worker = Worker::new(pool.clone(), 3, RowErrorPolicy::Continue, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let result = worker.load_file(&load, &path, &mut stats).await.unwrap();

        assert_eq!(result.records_loaded, 2);
        assert_eq!(result.records_failed, 1);
        assert_eq!(result.errors[0].line_number, Some(1));
        assert_eq!(result.errors[0].error_type, "insert_failed");
        assert_eq!(names(&pool).await, vec!["Barzane", "Quuxitude"]);
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped() {
        let (pool, spec, insert_sql) = setup().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("testformat1_latin1.txt");
        std::fs::write(
            &path,
            b"Foonyor   1103\nZ\xfcrich    1104\nBarzane   1105\nQuux      1106\n",
        )
        .unwrap();

        let worker = Worker::new(pool.clone(), 1, RowErrorPolicy::Continue, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let result = worker.load_file(&load, &path, &mut stats).await.unwrap();

        assert_eq!(result.records_loaded, 3);
        assert_eq!(result.records_failed, 1);
        assert_eq!(result.status, "partial");
        assert_eq!(result.errors[0].line_number, Some(2));
        assert_eq!(result.errors[0].error_type, "invalid_encoding");
        assert_eq!(names(&pool).await, vec!["Foonyor", "Barzane", "Quux"]);
    }

    #[tokio::test]
    async fn test_non_utf8_line_aborts_under_abort() {
        let (pool, spec, insert_sql) = setup().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("testformat1_latin1.txt");
        std::fs::write(&path, b"Foonyor   1103\nZ\xfcrich    1104\n").unwrap();

        let worker = Worker::new(pool.clone(), 1, RowErrorPolicy::Abort, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let err = worker
            .load_file(&load, &path, &mut stats)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_encoding");
        assert!(matches!(err, LoadError::AtLine { line: 2, .. }));
        assert_eq!(names(&pool).await, vec!["Foonyor"]);
    }

    #[tokio::test]
    async fn test_missing_data_file_is_recorded() {
        let (pool, spec, insert_sql) = setup().await;
        let dir = TempDir::new().unwrap();

        let worker = Worker::new(pool, 1, RowErrorPolicy::Continue, true);
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };
        let mut stats = ProgressStats::new();
        let result = worker
            .load_file(&load, &dir.path().join("testformat1_gone.txt"), &mut stats)
            .await
            .unwrap();

        assert_eq!(result.status, "failed");
        assert_eq!(result.errors[0].error_type, "resource_not_found");
    }
}
