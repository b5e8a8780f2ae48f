//! High-level runner API for the fixed-width loader.
//!
//! Wraps connection setup, the coordinator, and summary output behind one
//! call. This is the interface the CLI uses.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONNECTION, DEFAULT_DATA_DIR, DEFAULT_DATA_EXTENSION,
    DEFAULT_SPEC_DIR, DEFAULT_SPEC_EXTENSION,
};
use crate::coordination::{Coordinator, LoadConfig, LoadConfigBuilder, RowErrorPolicy};
use crate::db::{ConnectionTarget, Pool};

pub use crate::coordination::{ErrorRecord, FileResult, LoadResult, SpecPlan, SpecResult};

/// Arguments for a load run
#[derive(Debug, Clone)]
pub struct LoadArgs {
    /// SQLite file path, `sqlite:` URL, or `postgres://` URL
    pub connection: String,

    pub spec_dir: PathBuf,
    pub data_dir: PathBuf,
    pub spec_extension: String,
    pub data_extension: String,

    /// Rows per transaction
    pub batch_size: usize,
    /// Stop at the first failed row or spec instead of recording it
    pub fail_fast: bool,
    pub quiet: bool,

    /// Write the run summary as JSON to this path
    pub summary_json: Option<PathBuf>,

    // Test-only: inject a pre-created pool (for in-memory SQLite)
    #[cfg(test)]
    pub test_pool: Option<Pool>,
}

impl Default for LoadArgs {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            spec_dir: PathBuf::from(DEFAULT_SPEC_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            spec_extension: DEFAULT_SPEC_EXTENSION.to_string(),
            data_extension: DEFAULT_DATA_EXTENSION.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            fail_fast: false,
            quiet: false,
            summary_json: None,
            #[cfg(test)]
            test_pool: None,
        }
    }
}

impl LoadArgs {
    fn load_config(&self) -> Result<LoadConfig> {
        anyhow::ensure!(self.batch_size > 0, "Batch size must be at least 1");

        let on_row_error = if self.fail_fast {
            RowErrorPolicy::Abort
        } else {
            RowErrorPolicy::Continue
        };

        let config = LoadConfigBuilder::default()
            .spec_dir(self.spec_dir.clone())
            .data_dir(self.data_dir.clone())
            .spec_extension(self.spec_extension.clone())
            .data_extension(self.data_extension.clone())
            .batch_size(self.batch_size)
            .on_row_error(on_row_error)
            .quiet(self.quiet)
            .build()?;
        Ok(config)
    }
}

/// Load every spec in `spec_dir` and its matching data files into storage
///
/// Row and spec failures are reported in the returned `LoadResult`. An `Err`
/// means the run itself stopped: the connection failed, the spec directory
/// could not be read, or `fail_fast` was set and something failed.
///
/// # Example
///
/// ```no_run
/// use text_to_sql::runner::{LoadArgs, run_load};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = LoadArgs {
///     connection: "warehouse.sqlite3".to_string(),
///     batch_size: 500,
///     ..LoadArgs::default()
/// };
///
/// let result = run_load(args).await?;
/// println!("Loaded {} records in {:?}", result.records_loaded, result.duration);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs) -> Result<LoadResult> {
    let config = args.load_config()?;

    // Create connection pool (or use test pool if provided)
    #[cfg(test)]
    let (pool, owned) = match args.test_pool.clone() {
        Some(test_pool) => (test_pool, false),
        None => (connect(&args.connection).await?, true),
    };

    #[cfg(not(test))]
    let (pool, owned) = (connect(&args.connection).await?, true);

    let coordinator = Coordinator::new(pool.clone());
    let outcome = coordinator.run_load(&config).await;

    if owned {
        pool.close().await;
    }

    let result = outcome.context("Load run aborted")?;

    if let Some(path) = &args.summary_json {
        crate::coordination::write_summary(path, &result).await?;
        info!(path = %path.display(), "Wrote run summary");
    }

    Ok(result)
}

/// Parse every spec and show what a load would do, without opening storage
///
/// Each entry pairs a spec path with its plan, or with the reason the spec
/// would be skipped.
pub async fn plan_load(args: &LoadArgs) -> Result<Vec<(PathBuf, Result<SpecPlan>)>> {
    let config = args.load_config()?;
    let backend = ConnectionTarget::parse(&args.connection)?.backend();

    let plans = crate::coordination::plan_load(&config, backend)
        .await
        .context("Failed to read spec directory")?;

    Ok(plans
        .into_iter()
        .map(|(path, plan)| (path, plan.map_err(anyhow::Error::from)))
        .collect())
}

async fn connect(connection: &str) -> Result<Pool> {
    let target = ConnectionTarget::parse(connection)?;
    Pool::connect(&target)
        .await
        .with_context(|| format!("Failed to connect to {:?} storage", target.backend()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = LoadArgs::default();
        assert_eq!(args.connection, "text_to_sql.sqlite3");
        assert_eq!(args.spec_dir, PathBuf::from("./spec"));
        assert_eq!(args.data_dir, PathBuf::from("./data"));
        assert_eq!(args.batch_size, 1);
        assert!(args.summary_json.is_none());
    }

    #[test]
    fn test_load_config_maps_fail_fast() {
        let args = LoadArgs {
            fail_fast: true,
            batch_size: 25,
            ..LoadArgs::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.on_row_error, RowErrorPolicy::Abort);
        assert_eq!(config.batch_size, 25);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let args = LoadArgs {
            batch_size: 0,
            ..LoadArgs::default()
        };
        assert!(args.load_config().is_err());
    }

    #[tokio::test]
    async fn test_plan_load_rejects_bad_connection_scheme() {
        let args = LoadArgs {
            connection: "mysql://localhost/db".to_string(),
            ..LoadArgs::default()
        };
        let err = plan_load(&args).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported connection scheme"));
    }
}
