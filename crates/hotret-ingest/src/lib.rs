//! HOT/RET Loader Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads fixed-width HOT and RET record files into MySQL.
//!
//! Every line is classified by a source key taken from fixed positions,
//! resolved through the schema registry to a schema table (column offsets) and
//! a destination table, decoded field by field and loaded with the rest of its
//! file in one transaction. A file with any line that cannot be classified is
//! not loaded at all.
//!
//! # Pipeline
//!
//! - [`registry`]: source key → schema table and destination table
//! - [`metadata`]: lazily cached column offsets per schema table
//! - [`decoder`]: one line → one named-field record
//! - [`orchestrator`]: bounded concurrent decoding of a whole file
//! - [`loader`]: all-or-nothing transactional insert
//! - [`router`]: moves each file and its diagnostic logs to an outcome folder
//! - [`pipeline`] and [`run`]: per-file, per-directory and per-run drivers
//!
//! # Example
//!
//! ```no_run
//! use hotret_ingest::config::PipelineSettings;
//! use hotret_ingest::run::process_staging_directory;
//! use hotret_ingest::store::MemoryStore;
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new().with_mapping("ABC01", "ABC_META", "abc_data"));
//!     let report = process_staging_directory(
//!         store,
//!         Path::new("/data/HOT"),
//!         &PipelineSettings::default(),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!     println!("{} file(s) seen", report.files.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod loader;
pub mod metadata;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod run;
pub mod store;

pub use error::{IngestError, Result};
