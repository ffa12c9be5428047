//! HOT/RET Loader - fixed-width record file loader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hotret_common::logging::{init_logging, LogConfig, LogLevel};
use hotret_ingest::config::{parse_subfolders, DecodeConfig, IngestConfig};
use hotret_ingest::pipeline::FilePipeline;
use hotret_ingest::registry::SchemaRegistry;
use hotret_ingest::router::FileDestination;
use hotret_ingest::run;
use hotret_ingest::store::MySqlStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hotret-ingest")]
#[command(author, version, about = "Load fixed-width HOT/RET record files into MySQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every configured staging subfolder
    Run {
        /// Base folder holding the staging subfolders, overrides SOURCE_BASE_FOLDER
        #[arg(long)]
        base_folder: Option<PathBuf>,

        /// Subfolder=database pairs, comma separated, overrides HOTRET_SUBFOLDERS
        #[arg(long)]
        subfolders: Option<String>,

        /// Concurrent line decoders per file
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Decode one file without loading it and print JSON lines
    Decode {
        /// File to decode
        file: PathBuf,

        /// Database whose registry and schema tables are used
        #[arg(short, long)]
        database: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("hotret-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match cli.command {
        Command::Run {
            base_folder,
            subfolders,
            workers,
        } => {
            let mut config = IngestConfig::from_env_with(base_folder)
                .context("Failed to load configuration")?;
            if let Some(subfolders) = subfolders {
                config.subfolders = parse_subfolders(&subfolders)?;
            }
            if let Some(workers) = workers {
                config.pipeline.decode_workers = workers;
            }
            config.validate()?;

            info!(
                base_folder = %config.source_base_folder.display(),
                subfolders = config.subfolders.len(),
                workers = config.pipeline.decode_workers,
                "Starting load"
            );
            let report = run::run(&config, &cancel).await;

            let failed = report.count(FileDestination::Failed)
                + report.count(FileDestination::NoMatchingMetadata);
            if failed > 0 || report.failed_subfolders() > 0 {
                warn!(
                    failed_files = failed,
                    failed_subfolders = report.failed_subfolders(),
                    "Load finished with failures"
                );
            }
        },
        Command::Decode { file, database } => {
            let config = DecodeConfig::from_env().context("Failed to load configuration")?;
            decode(&config, &file, &database, &cancel).await?;
        },
    }

    Ok(())
}

/// Print every decoded record and every held-back line of `file` as JSON
async fn decode(
    config: &DecodeConfig,
    file: &std::path::Path,
    database: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let store = Arc::new(
        MySqlStore::connect(
            &config.database,
            database,
            config.registry.clone(),
            config.pipeline.insert_chunk_size,
        )
        .await?,
    );
    let registry = Arc::new(SchemaRegistry::load(store.as_ref()).await?);
    let pipeline = FilePipeline::new(Arc::clone(&store), registry, &config.pipeline)?;

    let decoded = pipeline.decode_file(file, cancel).await;
    store.close().await;
    let decoded = decoded.with_context(|| format!("Failed to decode {}", file.display()))?;

    for (table, records) in &decoded.records_by_table {
        for record in records {
            println!("{}", json!({ "table": table, "record": record }));
        }
    }
    for line in &decoded.not_inserted {
        println!("{}", serde_json::to_string(line)?);
    }

    info!(
        decoded = decoded.decoded_count(),
        not_inserted = decoded.not_inserted.len(),
        blank_lines = decoded.blank_lines,
        "Decode complete"
    );
    Ok(())
}

/// Cancel `token` on Ctrl+C
async fn shutdown_signal(token: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, finishing the current file");
            token.cancel();
        },
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
        },
    }
}
