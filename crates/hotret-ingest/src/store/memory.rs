//! In-memory store
//!
//! Holds a registry, schema tables and destination tables in process memory.
//! Inserts stay private to their transaction until commit, so rollback
//! semantics match a real database. Faults can be injected per table.

use super::{insert_columns, ColumnRow, IngestStore, MappingRow, StoreTransaction};
use crate::decoder::DecodedRecord;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    mappings: Vec<MappingRow>,
    schema_tables: HashMap<String, Vec<ColumnRow>>,
    tables: HashMap<String, MemoryTable>,
    failing_inserts: HashSet<String>,
    failing_fetches: HashSet<String>,
    fetch_counts: HashMap<String, usize>,
}

#[derive(Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<DecodedRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `source_key` → (`schema_table`, `destination_table`)
    pub fn with_mapping(self, source_key: &str, schema_table: &str, destination_table: &str) -> Self {
        self.state().mappings.push(MappingRow {
            source_key: source_key.to_string(),
            schema_table: Some(schema_table.to_string()),
            destination_table: Some(destination_table.to_string()),
        });
        self
    }

    /// Add a registry row as-is, including null table names
    pub fn with_mapping_row(self, row: MappingRow) -> Self {
        self.state().mappings.push(row);
        self
    }

    /// Define the offset rows of a schema table
    pub fn with_schema_table(self, name: &str, columns: Vec<ColumnRow>) -> Self {
        self.state().schema_tables.insert(name.to_string(), columns);
        self
    }

    /// Create an empty destination table with the given columns
    pub fn with_destination(self, table: &str, columns: &[&str]) -> Self {
        self.state().tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        self
    }

    /// Make every insert into `table` fail
    pub fn fail_inserts_into(self, table: &str) -> Self {
        self.state().failing_inserts.insert(table.to_string());
        self
    }

    /// Make every column fetch for `schema_table` fail
    pub fn fail_fetches_for(self, schema_table: &str) -> Self {
        self.state().failing_fetches.insert(schema_table.to_string());
        self
    }

    /// Committed rows of a destination table
    pub fn rows(&self, table: &str) -> Vec<DecodedRecord> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Total committed rows across all destination tables
    pub fn total_rows(&self) -> usize {
        self.state().tables.values().map(|t| t.rows.len()).sum()
    }

    /// How many times columns were fetched for `schema_table`
    pub fn fetch_count(&self, schema_table: &str) -> usize {
        self.state()
            .fetch_counts
            .get(schema_table)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn load_mappings(&self) -> Result<Vec<MappingRow>> {
        Ok(self.state().mappings.clone())
    }

    async fn fetch_columns(&self, schema_table: &str) -> Result<Vec<ColumnRow>> {
        let mut state = self.state();
        *state.fetch_counts.entry(schema_table.to_string()).or_default() += 1;

        if state.failing_fetches.contains(schema_table) {
            return Err(IngestError::Store(format!(
                "simulated fetch failure for {}",
                schema_table
            )));
        }

        match state.schema_tables.get(schema_table) {
            Some(columns) => Ok(columns.clone()),
            None => Err(IngestError::MissingTable(schema_table.to_string())),
        }
    }

    async fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            store: self.clone(),
            pending: Vec::new(),
        })
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    pending: Vec<(String, Vec<DecodedRecord>)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_batch(&mut self, table: &str, records: &[DecodedRecord]) -> Result<u64> {
        {
            let state = self.store.state();
            if state.failing_inserts.contains(table) {
                return Err(IngestError::Store(format!(
                    "simulated insert failure for {}",
                    table
                )));
            }
            let live = state
                .tables
                .get(table)
                .map(|t| t.columns.clone())
                .unwrap_or_default();
            insert_columns(table, &live, records)?;
        }

        self.pending.push((table.to_string(), records.to_vec()));
        Ok(records.len() as u64)
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.store.state();
        for (table, records) in self.pending {
            state.tables.entry(table).or_default().rows.extend(records);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(code: &str) -> DecodedRecord {
        let mut r = DecodedRecord::new();
        r.insert("code".to_string(), code.to_string());
        r
    }

    #[tokio::test]
    async fn test_rows_visible_only_after_commit() {
        let store = MemoryStore::new().with_destination("abc_data", &["code"]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_batch("abc_data", &[record("ABC")]).await.unwrap();
        assert_eq!(store.total_rows(), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.rows("abc_data").len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_pending_rows() {
        let store = MemoryStore::new().with_destination("abc_data", &["code"]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_batch("abc_data", &[record("ABC")]).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new()
            .with_destination("abc_data", &["code"])
            .fail_inserts_into("abc_data")
            .fail_fetches_for("ABC_META");

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_batch("abc_data", &[record("ABC")]).await.is_err());
        assert!(store.fetch_columns("ABC_META").await.is_err());
        assert_eq!(store.fetch_count("ABC_META"), 1);
    }
}
