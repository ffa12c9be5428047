//! All-or-nothing loading of a decoded file
//!
//! Every destination table of a file is written inside one store transaction.
//! The first failing insert rolls the whole file back.

use crate::decoder::DecodedRecord;
use crate::store::{IngestStore, StoreTransaction};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Rows committed per destination table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: BTreeMap<String, u64>,
}

impl LoadReport {
    pub fn total(&self) -> u64 {
        self.inserted.values().sum()
    }
}

/// Why a load was rolled back
///
/// `table` is set when the failure came from inserting into a specific table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub table: Option<String>,
    pub detail: String,
}

impl std::fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "[{}] {}", table, self.detail),
            None => f.write_str(&self.detail),
        }
    }
}

pub struct BatchLoader<S> {
    store: Arc<S>,
}

impl<S: IngestStore> BatchLoader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Insert every batch and commit, or roll back and report the failure
    ///
    /// Nothing is written when `batches` is empty.
    pub async fn load(
        &self,
        batches: &BTreeMap<String, Vec<DecodedRecord>>,
    ) -> std::result::Result<LoadReport, LoadFailure> {
        let mut report = LoadReport::default();
        if batches.values().all(Vec::is_empty) {
            debug!("No records to load");
            return Ok(report);
        }

        let mut tx = self.store.begin().await.map_err(|e| LoadFailure {
            table: None,
            detail: format!("Failed to begin transaction: {}", e),
        })?;

        for (table, records) in batches.iter().filter(|(_, records)| !records.is_empty()) {
            match tx.insert_batch(table, records).await {
                Ok(count) => {
                    debug!(table = %table, rows = count, "Inserted batch");
                    report.inserted.insert(table.clone(), count);
                },
                Err(e) => {
                    error!(table = %table, error = %e, "Bulk insert failed, rolling back");
                    if let Err(rollback_error) = tx.rollback().await {
                        error!(error = %rollback_error, "Rollback failed");
                    }
                    return Err(LoadFailure {
                        table: Some(table.clone()),
                        detail: e.to_string(),
                    });
                },
            }
        }

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Commit failed");
            LoadFailure {
                table: None,
                detail: format!("Failed to commit transaction: {}", e),
            }
        })?;

        info!(
            tables = report.inserted.len(),
            rows = report.total(),
            "Committed file load"
        );
        Ok(report)
    }
}
