//! Whole-run driver
//!
//! Each configured staging subfolder is loaded into its own database. A
//! subfolder that is missing, cannot connect or fails part way is logged and
//! the run moves on to the next one.

use crate::config::{IngestConfig, PipelineSettings, SubfolderTarget};
use crate::error::Result;
use crate::pipeline::{DirectoryReport, FilePipeline};
use crate::registry::SchemaRegistry;
use crate::router::{FileDestination, OutcomeRouter};
use crate::store::{IngestStore, MySqlStore};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub enum SubfolderStatus {
    /// The staging directory does not exist
    Missing,
    /// Setup or the sweep failed; files already routed stay routed
    Failed(String),
    Processed(DirectoryReport),
}

#[derive(Debug, Clone)]
pub struct SubfolderReport {
    pub target: SubfolderTarget,
    pub status: SubfolderStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub subfolders: Vec<SubfolderReport>,
}

impl RunReport {
    fn directories(&self) -> impl Iterator<Item = &DirectoryReport> {
        self.subfolders.iter().filter_map(|s| match &s.status {
            SubfolderStatus::Processed(report) => Some(report),
            _ => None,
        })
    }

    pub fn count(&self, destination: FileDestination) -> usize {
        self.directories().map(|d| d.count(destination)).sum()
    }

    pub fn failed_subfolders(&self) -> usize {
        self.subfolders
            .iter()
            .filter(|s| matches!(s.status, SubfolderStatus::Failed(_)))
            .count()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.directories().map(DirectoryReport::rows_inserted).sum()
    }
}

/// Sweep one staging directory against an already connected store
///
/// The registry is loaded fresh and the metadata cache lives only for this
/// sweep.
pub async fn process_staging_directory<S: IngestStore>(
    store: Arc<S>,
    directory: &Path,
    settings: &PipelineSettings,
    cancel: &CancellationToken,
) -> Result<DirectoryReport> {
    let router = OutcomeRouter::prepare(directory).await?;
    let registry = Arc::new(SchemaRegistry::load(store.as_ref()).await?);
    let pipeline = FilePipeline::new(store, registry, settings)?;
    pipeline.process_directory(&router, cancel).await
}

/// Process every configured subfolder in order
pub async fn run(config: &IngestConfig, cancel: &CancellationToken) -> RunReport {
    let mut report = RunReport::default();

    for target in &config.subfolders {
        if cancel.is_cancelled() {
            warn!("Cancelled, remaining subfolders not processed");
            break;
        }

        let directory = config.source_base_folder.join(&target.subfolder);
        let span = info_span!("subfolder", name = %target.subfolder, database = %target.database);

        let status = if !directory.is_dir() {
            warn!(parent: &span, directory = %directory.display(), "Subfolder does not exist, skipping");
            SubfolderStatus::Missing
        } else {
            match process_subfolder(config, target, &directory, cancel)
                .instrument(span.clone())
                .await
            {
                Ok(directory_report) => SubfolderStatus::Processed(directory_report),
                Err(e) => {
                    error!(
                        parent: &span,
                        directory = %directory.display(),
                        error = %e,
                        "Error setting up or processing subfolder"
                    );
                    SubfolderStatus::Failed(e.to_string())
                },
            }
        };

        report.subfolders.push(SubfolderReport {
            target: target.clone(),
            status,
        });
    }

    info!(
        processed = report.count(FileDestination::ProcessedSuccessfully),
        no_matching_metadata = report.count(FileDestination::NoMatchingMetadata),
        failed = report.count(FileDestination::Failed),
        failed_subfolders = report.failed_subfolders(),
        rows = report.rows_inserted(),
        "All processing complete"
    );
    report
}

async fn process_subfolder(
    config: &IngestConfig,
    target: &SubfolderTarget,
    directory: &Path,
    cancel: &CancellationToken,
) -> Result<DirectoryReport> {
    info!(directory = %directory.display(), "Processing subfolder");

    let store = Arc::new(
        MySqlStore::connect(
            &config.database,
            &target.database,
            config.registry.clone(),
            config.pipeline.insert_chunk_size,
        )
        .await?,
    );

    let result =
        process_staging_directory(Arc::clone(&store), directory, &config.pipeline, cancel).await;
    store.close().await;
    result
}
