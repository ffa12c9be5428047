//! Per-file and per-directory processing
//!
//! A file is read, decoded concurrently, passed through the all-or-nothing
//! gate, loaded in one transaction and finally routed. Files of a directory
//! are handled one at a time, in name order.

use crate::config::PipelineSettings;
use crate::decoder::LineDecoder;
use crate::error::{IngestError, Result};
use crate::loader::BatchLoader;
use crate::metadata::MetadataCache;
use crate::orchestrator::{DecodeOrchestrator, DecodedFile};
use crate::registry::SchemaRegistry;
use crate::router::{
    normalize_base_name, FileDestination, FileOutcome, LoadError, OutcomeRouter, RoutedFile,
};
use crate::store::IngestStore;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Pattern of the date token embedded in staged file names
pub const FILE_DATE_PATTERN: &str = r"D(\d{6})";

pub const UNKNOWN_DATE: &str = "unknown_date";

/// What happened to one file before routing
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub outcome: FileOutcome,
    pub instance_id: String,
    pub file_date: String,
    pub lines_read: usize,
    pub blank_lines: usize,
    pub inserted: BTreeMap<String, u64>,
    pub elapsed: Duration,
}

/// One file of a directory sweep
#[derive(Debug, Clone)]
pub struct FileReport {
    pub source: PathBuf,
    pub processed: ProcessedFile,
    /// `None` when the file could not be moved and stayed in staging
    pub routed: Option<RoutedFile>,
}

impl FileReport {
    pub fn destination(&self) -> FileDestination {
        self.processed.outcome.destination()
    }
}

/// Summary of one staging directory
#[derive(Debug, Clone, Default)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub files: Vec<FileReport>,
    /// Files left in staging because of cancellation
    pub skipped: usize,
}

impl DirectoryReport {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Files that reached `destination`
    pub fn count(&self, destination: FileDestination) -> usize {
        self.files
            .iter()
            .filter(|f| f.routed.is_some() && f.destination() == destination)
            .count()
    }

    /// Files that could not be moved out of staging
    pub fn unmoved(&self) -> usize {
        self.files.iter().filter(|f| f.routed.is_none()).count()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.files
            .iter()
            .flat_map(|f| f.processed.inserted.values())
            .sum()
    }
}

/// Everything needed to process the files of one database
pub struct FilePipeline<S> {
    orchestrator: DecodeOrchestrator<S>,
    loader: BatchLoader<S>,
    date_pattern: Regex,
}

impl<S: IngestStore> FilePipeline<S> {
    /// Build a pipeline with a fresh metadata cache
    pub fn new(
        store: Arc<S>,
        registry: Arc<SchemaRegistry>,
        settings: &PipelineSettings,
    ) -> Result<Self> {
        let metadata = Arc::new(MetadataCache::new(Arc::clone(&store)));
        let decoder = Arc::new(LineDecoder::new(registry, metadata));

        Ok(Self {
            orchestrator: DecodeOrchestrator::new(decoder, settings.decode_workers),
            loader: BatchLoader::new(store),
            date_pattern: Regex::new(FILE_DATE_PATTERN)?,
        })
    }

    /// Date token of a file name, or `unknown_date`
    pub fn file_date(&self, file_name: &str) -> String {
        self.date_pattern
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .map_or_else(|| UNKNOWN_DATE.to_string(), |m| m.as_str().to_string())
    }

    /// Read and decode a file without loading it
    pub async fn decode_file(&self, path: &Path, cancel: &CancellationToken) -> Result<DecodedFile> {
        let instance_id = instance_id(path);
        let lines = read_lines(path).await?;
        self.orchestrator
            .decode_lines(lines, &instance_id, cancel)
            .await
    }

    /// Decode and load one file, deciding its outcome
    ///
    /// Only cancellation is returned as an error. Read and load failures become
    /// a failed outcome so the file is still routed.
    pub async fn process_file(&self, path: &Path, cancel: &CancellationToken) -> Result<ProcessedFile> {
        let started = Instant::now();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut processed = ProcessedFile {
            outcome: FileOutcome::Success,
            instance_id: normalize_base_name(&file_name),
            file_date: self.file_date(&file_name),
            lines_read: 0,
            blank_lines: 0,
            inserted: BTreeMap::new(),
            elapsed: Duration::ZERO,
        };
        info!(date = %processed.file_date, instance_id = %processed.instance_id, "Processing file");

        let decoded = match self.decode_file(path, cancel).await {
            Ok(decoded) => decoded,
            Err(e @ IngestError::Cancelled(_)) => return Err(e),
            Err(e) => {
                error!(error = %e, "Error processing file");
                processed.outcome = FileOutcome::Failure {
                    not_inserted: Vec::new(),
                    load_errors: vec![LoadError::new(None, e.to_string())],
                };
                processed.elapsed = started.elapsed();
                return Ok(processed);
            },
        };
        processed.lines_read = decoded.lines_read;
        processed.blank_lines = decoded.blank_lines;

        if !decoded.passes_gate() {
            let count = decoded.not_inserted.len();
            processed.outcome = FileOutcome::Failure {
                not_inserted: decoded.not_inserted.into_iter().map(|n| n.line).collect(),
                load_errors: vec![LoadError::new(
                    None,
                    format!("{} line(s) could not be matched to metadata", count),
                )],
            };
        } else {
            match self.loader.load(&decoded.records_by_table).await {
                Ok(report) => {
                    for (table, rows) in &report.inserted {
                        info!(table = %table, rows, "Inserted records");
                    }
                    processed.inserted = report.inserted;
                },
                Err(failure) => {
                    processed.outcome = FileOutcome::Failure {
                        not_inserted: Vec::new(),
                        load_errors: vec![LoadError::from(failure)],
                    };
                },
            }
        }

        processed.elapsed = started.elapsed();
        info!(
            elapsed_secs = processed.elapsed.as_secs_f64(),
            success = processed.outcome.is_success(),
            "Processed file"
        );
        Ok(processed)
    }

    /// Process every regular file directly inside the router's staging
    /// directory
    ///
    /// A file that cannot be moved is logged and left behind; the sweep goes on.
    pub async fn process_directory(
        &self,
        router: &OutcomeRouter,
        cancel: &CancellationToken,
    ) -> Result<DirectoryReport> {
        let files = staged_files(router.staging()).await?;
        let mut report = DirectoryReport::new(router.staging());

        for (index, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                report.skipped = files.len() - index;
                warn!(remaining = report.skipped, "Cancelled, leaving remaining files in staging");
                break;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let span = info_span!("file", name = %name);

            let processed = match self.process_file(path, cancel).instrument(span.clone()).await {
                Ok(processed) => processed,
                Err(e @ IngestError::Cancelled(_)) => {
                    warn!(file = %name, error = %e, "File left in staging");
                    report.skipped = files.len() - index;
                    break;
                },
                Err(e) => return Err(e),
            };

            let routed = match router.route(path, &processed.outcome).instrument(span).await {
                Ok(routed) => Some(routed),
                Err(e) => {
                    error!(file = %name, error = %e, "Failed to move file, leaving it in staging");
                    None
                },
            };

            report.files.push(FileReport {
                source: path.clone(),
                processed,
                routed,
            });
        }

        info!(
            directory = %report.directory.display(),
            processed = report.count(FileDestination::ProcessedSuccessfully),
            no_matching_metadata = report.count(FileDestination::NoMatchingMetadata),
            failed = report.count(FileDestination::Failed),
            unmoved = report.unmoved(),
            rows = report.rows_inserted(),
            "Directory processed"
        );
        Ok(report)
    }
}

/// Per-file identifier stamped on every record
pub fn instance_id(path: &Path) -> String {
    path.file_name()
        .map(|n| normalize_base_name(&n.to_string_lossy()))
        .unwrap_or_default()
}

/// Read a file as lines with their terminators removed
pub async fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Regular files directly inside `dir`, sorted by name
pub async fn staged_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}
