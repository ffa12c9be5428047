//! Column metadata and its per-run cache
//!
//! Each schema table lists the fields of one line format with a 1-based start
//! position and a length. The cache fetches a table's columns on first use and
//! keeps the answer, including "unavailable", until the run ends.

use crate::store::{ColumnRow, IngestStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// One field of a fixed-width line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub field_name: String,
    /// 1-based, as stored
    pub start_position: Option<i64>,
    pub length: Option<i64>,
    /// Advisory only; decoded values stay text
    pub declared_type: Option<String>,
}

impl ColumnDefinition {
    /// 0-based start and length, if both are present and representable
    pub fn span(&self) -> Option<(i64, i64)> {
        match (self.start_position, self.length) {
            (Some(start), Some(length)) => start.checked_sub(1).map(|start| (start, length)),
            _ => None,
        }
    }
}

impl From<ColumnRow> for ColumnDefinition {
    fn from(row: ColumnRow) -> Self {
        Self {
            start_position: coerce_integer(row.start_position.as_deref()),
            length: coerce_integer(row.length.as_deref()),
            field_name: row.field_name,
            declared_type: row.declared_type,
        }
    }
}

/// Leniently read a stored offset or length
///
/// Integers and finite decimals (truncated toward zero) are accepted; anything
/// else, including a missing value, becomes `None`.
pub fn coerce_integer(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() < i64::MAX as f64)
        .map(|v| v.trunc() as i64)
}

/// Column definitions of one schema table, shared between decoders
pub type TableMetadata = Arc<[ColumnDefinition]>;

/// Lazily populated schema table → columns map
///
/// Two decoders missing the same table at once may both fetch it; the second
/// write replaces the first with an identical answer.
pub struct MetadataCache<S> {
    store: Arc<S>,
    entries: RwLock<HashMap<String, Option<TableMetadata>>>,
}

impl<S: IngestStore> MetadataCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Columns of `schema_table`, or `None` when no definitions are available
    ///
    /// Fetch errors are logged and treated as an empty table.
    pub async fn get(&self, schema_table: &str) -> Option<TableMetadata> {
        if let Some(entry) = self.entries.read().await.get(schema_table) {
            return entry.clone();
        }

        let fetched = match self.store.fetch_columns(schema_table).await {
            Ok(rows) if rows.is_empty() => {
                warn!(schema_table = %schema_table, "Schema table has no column definitions");
                None
            },
            Ok(rows) => {
                let columns: TableMetadata =
                    rows.into_iter().map(ColumnDefinition::from).collect();
                debug!(schema_table = %schema_table, columns = columns.len(), "Cached column metadata");
                Some(columns)
            },
            Err(e) => {
                error!(schema_table = %schema_table, error = %e, "Error fetching metadata");
                None
            },
        };

        self.entries
            .write()
            .await
            .insert(schema_table.to_string(), fetched.clone());
        fetched
    }

    /// Number of schema tables looked up so far, available or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
