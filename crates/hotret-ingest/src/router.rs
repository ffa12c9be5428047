//! File outcome routing
//!
//! After a file has been decoded and (maybe) loaded it moves from the staging
//! directory to exactly one of three outcome folders. Failed files take their
//! diagnostic logs with them.

use crate::error::{IngestError, Result};
use crate::loader::LoadFailure;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

pub const PROCESSED_SUCCESSFULLY_DIR: &str = "Processed Successfully";
pub const FAILED_DIR: &str = "Failed";
pub const NO_MATCHING_METADATA_DIR: &str = "No Matching Metadata";

pub const NO_MATCHING_METADATA_PREFIX: &str = "NO_MATCHING_METADATA_";
pub const FAILED_INSERT_PREFIX: &str = "FAILED_INSERT_";

const DIAGNOSTIC_PREFIXES: [&str; 2] = [NO_MATCHING_METADATA_PREFIX, FAILED_INSERT_PREFIX];

/// One entry of the failed-insert log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub table: Option<String>,
    pub detail: String,
}

impl LoadError {
    pub fn new(table: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            table,
            detail: detail.into(),
        }
    }

    /// Line written to the failed-insert log
    pub fn log_line(&self) -> String {
        match &self.table {
            Some(table) => format!("ERROR - Bulk insert failed [{}]: {}", table, self.detail),
            None => format!("ERROR - Bulk insert failed: {}", self.detail),
        }
    }
}

impl From<LoadFailure> for LoadError {
    fn from(failure: LoadFailure) -> Self {
        Self {
            table: failure.table,
            detail: failure.detail,
        }
    }
}

/// How processing of one file ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Success,
    Failure {
        /// Raw lines that could not be classified or decoded
        not_inserted: Vec<String>,
        load_errors: Vec<LoadError>,
    },
}

impl FileOutcome {
    pub fn destination(&self) -> FileDestination {
        match self {
            FileOutcome::Success => FileDestination::ProcessedSuccessfully,
            FileOutcome::Failure { not_inserted, .. } if !not_inserted.is_empty() => {
                FileDestination::NoMatchingMetadata
            },
            FileOutcome::Failure { .. } => FileDestination::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Success)
    }
}

/// Terminal location of a processed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileDestination {
    ProcessedSuccessfully,
    NoMatchingMetadata,
    Failed,
}

impl FileDestination {
    pub fn folder_name(&self) -> &'static str {
        match self {
            FileDestination::ProcessedSuccessfully => PROCESSED_SUCCESSFULLY_DIR,
            FileDestination::NoMatchingMetadata => NO_MATCHING_METADATA_DIR,
            FileDestination::Failed => FAILED_DIR,
        }
    }
}

impl std::fmt::Display for FileDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// Base name of a file with its extension and any diagnostic prefixes removed
///
/// Prefixes are stripped repeatedly, so names produced by earlier runs map back
/// to the same identifier.
pub fn normalize_base_name(file_name: &str) -> String {
    let mut base = Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    while let Some(stripped) = DIAGNOSTIC_PREFIXES
        .iter()
        .find_map(|prefix| base.strip_prefix(prefix))
    {
        base = stripped.to_string();
    }
    base
}

pub fn not_inserted_log_name(base: &str) -> String {
    format!("{}{}.txt", NO_MATCHING_METADATA_PREFIX, base)
}

pub fn failed_insert_log_name(base: &str) -> String {
    format!("{}{}.txt", FAILED_INSERT_PREFIX, base)
}

/// Where a file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFile {
    pub destination: FileDestination,
    pub path: PathBuf,
    pub diagnostics: Vec<PathBuf>,
}

/// The three outcome folders of one staging directory
#[derive(Debug, Clone)]
pub struct OutcomeRouter {
    staging: PathBuf,
}

impl OutcomeRouter {
    /// Create the outcome folders under `staging` if they are missing
    pub async fn prepare(staging: impl Into<PathBuf>) -> Result<Self> {
        let router = Self {
            staging: staging.into(),
        };
        for destination in [
            FileDestination::ProcessedSuccessfully,
            FileDestination::Failed,
            FileDestination::NoMatchingMetadata,
        ] {
            fs::create_dir_all(router.folder(destination)).await?;
        }
        Ok(router)
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn folder(&self, destination: FileDestination) -> PathBuf {
        self.staging.join(destination.folder_name())
    }

    /// Write diagnostics next to `file` if it failed, then move it and them
    ///
    /// If the file itself cannot be moved, the logs just written are removed
    /// and the error returned, leaving staging as it was. Once the file has
    /// moved, a log that fails to follow is reported and left in staging.
    pub async fn route(&self, file: &Path, outcome: &FileOutcome) -> Result<RoutedFile> {
        let file_name = file.file_name().ok_or_else(|| {
            IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a file path: {}", file.display()),
            ))
        })?;
        let destination = outcome.destination();
        let target_dir = self.folder(destination);

        let diagnostics = match outcome {
            FileOutcome::Success => Vec::new(),
            FileOutcome::Failure {
                not_inserted,
                load_errors,
            } => {
                let base = normalize_base_name(&file_name.to_string_lossy());
                write_diagnostics(file, &base, not_inserted, load_errors).await?
            },
        };

        let target = target_dir.join(file_name);
        if let Err(e) = fs::rename(file, &target).await {
            error!(file = %file.display(), target = %target.display(), error = %e, "Error moving file");
            remove_logs(&diagnostics).await;
            return Err(e.into());
        }

        let mut moved = Vec::with_capacity(diagnostics.len());
        for log in diagnostics {
            let Some(log_name) = log.file_name() else {
                continue;
            };
            let log_target = target_dir.join(log_name);
            match fs::rename(&log, &log_target).await {
                Ok(()) => moved.push(log_target),
                Err(e) => {
                    error!(log = %log.display(), target = %log_target.display(), error = %e, "Error moving diagnostic log");
                },
            }
        }

        match destination {
            FileDestination::ProcessedSuccessfully => {
                info!(file = %file.display(), target = %target.display(), "Moved processed file");
            },
            _ => {
                warn!(
                    file = %file.display(),
                    folder = %destination,
                    logs = moved.len(),
                    "File encountered issues, moved with its logs"
                );
            },
        }

        Ok(RoutedFile {
            destination,
            path: target,
            diagnostics: moved,
        })
    }
}

/// Write the diagnostic logs for a failed `source` next to it
///
/// The not-inserted log only exists when lines were held back. The
/// failed-insert log is always written, unless its name is the source's own
/// name (a log left over from an earlier run being processed again).
async fn write_diagnostics(
    source: &Path,
    base: &str,
    not_inserted: &[String],
    load_errors: &[LoadError],
) -> Result<Vec<PathBuf>> {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let mut written = Vec::with_capacity(2);

    if !not_inserted.is_empty() {
        let path = dir.join(not_inserted_log_name(base));
        if write_log(source, &path, not_inserted.iter().map(String::as_str)).await? {
            info!(path = %path.display(), lines = not_inserted.len(), "Not inserted records log written");
            written.push(path);
        }
    }

    let path = dir.join(failed_insert_log_name(base));
    let lines: Vec<String> = load_errors.iter().map(LoadError::log_line).collect();
    match write_log(source, &path, lines.iter().map(String::as_str)).await {
        Ok(true) => {
            info!(path = %path.display(), errors = load_errors.len(), "Failed records log written");
            written.push(path);
        },
        Ok(false) => {},
        Err(e) => {
            remove_logs(&written).await;
            return Err(e);
        },
    }

    Ok(written)
}

/// Best-effort removal of logs that will not be moved
async fn remove_logs(logs: &[PathBuf]) {
    for log in logs {
        if let Err(e) = fs::remove_file(log).await {
            warn!(log = %log.display(), error = %e, "Error removing diagnostic log");
        }
    }
}

/// Write `lines` to `path`; returns false if `path` is the source itself
async fn write_log<'a>(
    source: &Path,
    path: &Path,
    lines: impl Iterator<Item = &'a str>,
) -> Result<bool> {
    if path == source {
        warn!(path = %path.display(), "Diagnostic log would replace its own source file, not written");
        return Ok(false);
    }
    fs::write(path, join_lines(lines)).await?;
    Ok(true)
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
