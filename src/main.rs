//! # docrelay CLI
//!
//! ## Usage
//!
//! ```bash
//! docrelay --config ./config/docrelay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrelay init` | Create the SQLite database and run schema migrations |
//! | `docrelay serve` | Start the HTTP API |
//! | `docrelay process <file.pdf>` | Upload, analyze, and persist one PDF, waiting for the result |
//! | `docrelay status <job_id>` | Show a job's backend status and workflow stage |
//! | `docrelay results <job_id>` | Print (or save) the raw results of a succeeded job |
//! | `docrelay group <results.json>` | Group a saved results file into narrative sections |
//!
//! Settings come from the config file and the environment; a `.env` file in
//! the working directory is loaded first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docrelay::analysis::TextractBackend;
use docrelay::config::{self, Config};
use docrelay::models::AnalysisResult;
use docrelay::object_store::S3ObjectStore;
use docrelay::records::JobRecords;
use docrelay::workflow::{narrative_from_results, DocumentWorkflow, JobResults};
use docrelay::{db, migrate, server};

/// docrelay: PDF layout analysis and narrative grouping.
#[derive(Parser)]
#[command(
    name = "docrelay",
    about = "Upload PDFs, run asynchronous layout analysis, and group the results into titled sections",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "./config/docrelay.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the `documents` and
    /// `analysis_jobs` tables. Safe to run more than once.
    Init,

    /// Start the HTTP API.
    Serve,

    /// Run the whole pipeline for one PDF and wait for it to finish.
    Process {
        /// Path to the PDF file.
        file: PathBuf,
    },

    /// Show the status of an analysis job.
    Status {
        job_id: String,
    },

    /// Fetch the raw results of a succeeded job.
    Results {
        job_id: String,

        /// Write the results JSON to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Group a saved results file into narrative sections.
    Group {
        /// A `<stem>_results.json` file produced by `process` or `results`.
        results: PathBuf,

        /// Override `grouping.max_characters`.
        #[arg(long)]
        max_characters: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "docrelay=debug,tower_http=debug"
    } else {
        "docrelay=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load_config(Some(cli.config.as_path()))?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.url).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Process { file } => {
            let workflow = build_workflow(&cfg).await?;
            let result = workflow
                .run_file(&file)
                .await
                .with_context(|| format!("Failed to process {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Status { job_id } => {
            let workflow = build_workflow(&cfg).await?;
            let view = workflow.status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Results { job_id, output } => {
            let workflow = build_workflow(&cfg).await?;
            match workflow.results(&job_id).await? {
                JobResults::Pending { status } => {
                    println!("Job is not completed yet. Current status: {}", status);
                }
                JobResults::Ready(result) => {
                    write_json(&result, output.as_deref())?;
                }
            }
        }
        Commands::Group {
            results,
            max_characters,
        } => {
            let content = std::fs::read_to_string(&results)
                .with_context(|| format!("Failed to read {}", results.display()))?;
            let result: AnalysisResult = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", results.display()))?;
            let max = max_characters.unwrap_or(cfg.grouping.max_characters);
            let groups = narrative_from_results(&result, max);
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
    }

    Ok(())
}

async fn build_workflow(cfg: &Config) -> Result<DocumentWorkflow> {
    let pool = db::connect(&cfg.db.url).await?;
    migrate::run_migrations(&pool).await?;

    let store = S3ObjectStore::from_env(&cfg.storage).context("Failed to configure object store")?;
    let backend =
        TextractBackend::from_env(&cfg.analysis).context("Failed to configure analysis backend")?;

    Ok(DocumentWorkflow::new(
        Arc::new(store),
        Arc::new(backend),
        JobRecords::new(pool),
        cfg,
    ))
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
