use derive_builder::Builder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::summary::{ErrorRecord, LoadResult, SpecResult};
use super::worker::{FileLoad, RowErrorPolicy, Worker};
use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_DATA_DIR, DEFAULT_DATA_EXTENSION, DEFAULT_SPEC_DIR,
    DEFAULT_SPEC_EXTENSION,
};
use crate::db::schema::{generate_ddl, generate_insert, render_literal_insert};
use crate::db::{Backend, Pool, ensure_table};
use crate::error::Result;
use crate::formats::{FormatSpec, decode};
use crate::io::{LocalLineReader, ResourcePattern, discover};
use crate::telemetry::ProgressStats;

/// Configuration for a load run
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct LoadConfig {
    #[builder(default = "PathBuf::from(DEFAULT_SPEC_DIR)")]
    pub spec_dir: PathBuf,
    #[builder(default = "PathBuf::from(DEFAULT_DATA_DIR)")]
    pub data_dir: PathBuf,
    #[builder(default = "DEFAULT_SPEC_EXTENSION.to_string()")]
    pub spec_extension: String,
    #[builder(default = "DEFAULT_DATA_EXTENSION.to_string()")]
    pub data_extension: String,
    /// Rows committed per transaction
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    #[builder(default)]
    pub on_row_error: RowErrorPolicy,
    #[builder(default)]
    pub quiet: bool,
}

/// What a load would do for one spec, computed without touching storage
#[derive(Debug, Clone, Serialize)]
pub struct SpecPlan {
    pub spec_path: PathBuf,
    pub spec: FormatSpec,
    pub line_width: usize,
    pub ddl: String,
    pub insert_sql: String,
    pub data_files: Vec<PathBuf>,
    /// Literal INSERT for the first non-empty line of the first data file
    pub sample_insert: Option<String>,
}

/// The Coordinator walks the spec directory and drives the worker through
/// every matching data file, one at a time.
pub struct Coordinator {
    pool: Pool,
}

impl Coordinator {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run the complete load
    ///
    /// 1. Generate a run id
    /// 2. Discover spec files, sorted by name
    /// 3. For each spec: parse it, synchronize its table, load its data files
    /// 4. Aggregate results
    ///
    /// Spec-level failures are recorded and the run moves on to the next spec,
    /// unless the row error policy is `Abort`. Connection failures end the run.
    pub async fn run_load(&self, config: &LoadConfig) -> Result<LoadResult> {
        let start_time = Instant::now();

        let run_id = Uuid::new_v4().to_string();
        info!(
            %run_id,
            spec_dir = %config.spec_dir.display(),
            data_dir = %config.data_dir.display(),
            "Starting load run"
        );

        let spec_paths = discover(
            &config.spec_dir,
            &ResourcePattern::with_extension(&config.spec_extension),
        )
        .await?;

        if spec_paths.is_empty() {
            warn!(
                spec_dir = %config.spec_dir.display(),
                extension = %config.spec_extension,
                "No spec files found"
            );
        }

        let worker = Worker::new(
            self.pool.clone(),
            config.batch_size,
            config.on_row_error,
            config.quiet,
        );
        let mut stats = ProgressStats::new();
        let mut spec_results = Vec::with_capacity(spec_paths.len());

        for spec_path in &spec_paths {
            let spec_result = self
                .load_spec(config, &worker, spec_path, &mut stats)
                .await?;
            spec_results.push(spec_result);
        }

        let (p50, p90, p99) = stats.get_percentiles();
        if let (Some(p50), Some(p90), Some(p99)) = (p50, p90, p99) {
            info!("Commit time p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99);
        }

        Ok(Self::aggregate(run_id, spec_results, start_time))
    }

    /// Load one spec, recording spec-level failures in the returned result
    async fn load_spec(
        &self,
        config: &LoadConfig,
        worker: &Worker,
        spec_path: &Path,
        stats: &mut ProgressStats,
    ) -> Result<SpecResult> {
        let mut result = SpecResult {
            spec_path: spec_path.to_path_buf(),
            table: None,
            table_created: false,
            status: String::new(),
            files: Vec::new(),
            error: None,
        };

        if let Err(e) = self
            .process_spec(config, worker, spec_path, stats, &mut result)
            .await
        {
            if e.is_fatal() || config.on_row_error == RowErrorPolicy::Abort {
                return Err(e);
            }
            warn!(spec = %spec_path.display(), error = %e, "Skipping spec");
            result.error = Some(ErrorRecord::from(&e));
        }

        result.finish();
        Ok(result)
    }

    async fn process_spec(
        &self,
        config: &LoadConfig,
        worker: &Worker,
        spec_path: &Path,
        stats: &mut ProgressStats,
        result: &mut SpecResult,
    ) -> Result<()> {
        let spec = FormatSpec::from_path(spec_path, &config.spec_extension).await?;
        info!(
            spec = %spec_path.display(),
            table = %spec.name,
            columns = spec.columns.len(),
            "Parsed spec"
        );
        result.table = Some(spec.name.clone());

        let status = ensure_table(&self.pool, &spec).await?;
        result.table_created = status.created;

        let data_files = discover(
            &config.data_dir,
            &ResourcePattern::with_prefix(&spec.name, &config.data_extension),
        )
        .await?;

        if data_files.is_empty() {
            info!(table = %spec.name, "No data files for spec");
            return Ok(());
        }

        let insert_sql = generate_insert(&spec, self.pool.backend());
        let load = FileLoad {
            spec: &spec,
            insert_sql: &insert_sql,
        };

        for path in &data_files {
            let file_result = worker.load_file(&load, path, stats).await?;
            result.files.push(file_result);
        }

        Ok(())
    }

    fn aggregate(run_id: String, spec_results: Vec<SpecResult>, start_time: Instant) -> LoadResult {
        let files = spec_results.iter().flat_map(|s| &s.files);
        let files_processed = files.clone().count();
        let files_failed = files.filter(|f| f.status == "failed").count();
        let specs_failed = spec_results.iter().filter(|s| s.error.is_some()).count();
        let records_loaded: u64 = spec_results.iter().map(SpecResult::records_loaded).sum();
        let records_failed: u64 = spec_results.iter().map(SpecResult::records_failed).sum();
        let duration = start_time.elapsed();

        info!(
            "Load complete: {} specs ({} failed), {} files, {} records loaded, {} records failed in {:.2}s",
            spec_results.len(),
            specs_failed,
            files_processed,
            records_loaded,
            records_failed,
            duration.as_secs_f64()
        );

        LoadResult {
            run_id,
            specs_processed: spec_results.len(),
            specs_failed,
            files_processed,
            files_failed,
            records_loaded,
            records_failed,
            duration,
            spec_results,
        }
    }
}

/// Work out the statements a load would run, without connecting to storage
pub async fn plan_load(
    config: &LoadConfig,
    backend: Backend,
) -> Result<Vec<(PathBuf, Result<SpecPlan>)>> {
    let spec_paths = discover(
        &config.spec_dir,
        &ResourcePattern::with_extension(&config.spec_extension),
    )
    .await?;

    let mut plans = Vec::with_capacity(spec_paths.len());
    for spec_path in spec_paths {
        let plan = plan_spec(config, backend, &spec_path).await;
        plans.push((spec_path, plan));
    }
    Ok(plans)
}

async fn plan_spec(config: &LoadConfig, backend: Backend, spec_path: &Path) -> Result<SpecPlan> {
    let spec = FormatSpec::from_path(spec_path, &config.spec_extension).await?;
    let data_files = discover(
        &config.data_dir,
        &ResourcePattern::with_prefix(&spec.name, &config.data_extension),
    )
    .await?;

    let sample_insert = match data_files.first() {
        Some(path) => sample_insert(&spec, path).await?,
        None => None,
    };

    Ok(SpecPlan {
        spec_path: spec_path.to_path_buf(),
        line_width: spec.line_width(),
        ddl: generate_ddl(&spec, backend),
        insert_sql: generate_insert(&spec, backend),
        data_files,
        sample_insert,
        spec,
    })
}

/// Render the first non-empty line of `path` as a literal INSERT
async fn sample_insert(spec: &FormatSpec, path: &Path) -> Result<Option<String>> {
    let mut reader = LocalLineReader::open(path).await?;

    while let Some((line_number, line)) = reader.next_line().await? {
        let line = line.map_err(|e| e.at_line(reader.path(), line_number))?;
        if line.is_empty() {
            continue;
        }
        let tokens =
            decode(&spec.columns, &line).map_err(|e| e.at_line(reader.path(), line_number))?;
        return Ok(Some(render_literal_insert(&spec.name, &tokens)));
    }

    Ok(None)
}
