use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use text_to_sql::runner::{LoadArgs, LoadResult, plan_load, run_load};

#[derive(Parser, Clone)]
#[command(version, about = "Load fixed-width text files into SQL tables")]
struct Args {
    /// Storage target: SQLite file path, sqlite: URL, or postgres:// URL
    #[arg(short, long, env = "TEXT_TO_SQL_CONNECTION", default_value = "text_to_sql.sqlite3")]
    connection: String,

    /// Directory holding spec files (one table per file)
    #[arg(long, alias = "spec_dir", default_value = "./spec")]
    spec_dir: PathBuf,

    /// Directory holding fixed-width data files
    #[arg(long, alias = "data_dir", default_value = "./data")]
    data_dir: PathBuf,

    /// Spec file extension
    #[arg(long, default_value = "csv")]
    spec_ext: String,

    /// Data file extension
    #[arg(long, default_value = "txt")]
    data_ext: String,

    /// Rows committed per transaction
    #[arg(short, long, default_value = "1")]
    batch_size: usize,

    /// Stop at the first failed row or spec
    #[arg(long)]
    fail_fast: bool,

    /// Parse specs and show the statements that would run, without touching storage
    #[arg(long)]
    dry_run: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("text_to_sql=warn,sqlx=off")
    } else {
        EnvFilter::new("text_to_sql=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let dry_run = args.dry_run;
    let load_args = LoadArgs {
        connection: args.connection,
        spec_dir: args.spec_dir,
        data_dir: args.data_dir,
        spec_extension: args.spec_ext,
        data_extension: args.data_ext,
        batch_size: args.batch_size,
        fail_fast: args.fail_fast,
        quiet: args.quiet,
        summary_json: args.summary_json,
    };

    if !load_args.quiet {
        println!("Fixed-Width Text Loader");
        println!("=======================");
        println!("Specs: {}", load_args.spec_dir.display());
        println!("Data: {}", load_args.data_dir.display());
        println!("Batch size: {}", load_args.batch_size);
        println!();
    }

    if dry_run {
        return print_plan(&load_args).await;
    }

    let result = run_load(load_args).await?;
    print_summary(&result);

    Ok(if result.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn print_plan(args: &LoadArgs) -> anyhow::Result<ExitCode> {
    println!("DRY RUN MODE - No data will be loaded");
    println!();

    let plans = plan_load(args).await?;
    let mut failed = 0;

    for (spec_path, plan) in &plans {
        println!("Spec: {}", spec_path.display());
        match plan {
            Ok(plan) => {
                println!("  Table: {}", plan.spec.name);
                println!("  Line width: {} characters", plan.line_width);
                println!("  DDL: {}", plan.ddl);
                println!("  Insert: {}", plan.insert_sql);
                if plan.data_files.is_empty() {
                    println!("  Data files: none");
                } else {
                    println!("  Data files:");
                    for path in &plan.data_files {
                        println!("    {}", path.display());
                    }
                }
                if let Some(sample) = &plan.sample_insert {
                    println!("  First row: {}", sample);
                }
            }
            Err(e) => {
                failed += 1;
                println!("  Skipped: {:#}", e);
            }
        }
        println!();
    }

    println!("To execute, run without --dry-run");
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(result: &LoadResult) {
    println!();
    println!("Load Summary");
    println!("============");
    println!("Run ID: {}", result.run_id);
    println!(
        "Specs processed: {} ({} failed)",
        result.specs_processed, result.specs_failed
    );
    println!(
        "Files processed: {} ({} failed)",
        result.files_processed, result.files_failed
    );
    println!("Records loaded: {}", result.records_loaded);
    println!("Records failed: {}", result.records_failed);
    println!("Duration: {:.2}s", result.duration.as_secs_f64());

    let failures: Vec<_> = result
        .spec_results
        .iter()
        .filter_map(|s| s.error.as_ref())
        .chain(
            result
                .spec_results
                .iter()
                .flat_map(|s| &s.files)
                .flat_map(|f| &f.errors),
        )
        .collect();

    if !failures.is_empty() {
        println!();
        println!("Errors:");
        for error in &failures {
            println!("  [{}] {}", error.error_type, error.error_message);
        }
    }
}
