//! Store abstraction
//!
//! The pipeline needs very little from the relational engine: read the schema
//! registry, read one schema table's column offsets, and run bulk inserts
//! inside a single transaction. [`IngestStore`] captures exactly that so the
//! pipeline can run against MySQL in production and [`memory::MemoryStore`]
//! in tests.

pub mod memory;
pub mod mysql;

use crate::decoder::DecodedRecord;
use crate::error::{IngestError, Result};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// One registry row: source key → schema table + destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRow {
    pub source_key: String,
    pub schema_table: Option<String>,
    pub destination_table: Option<String>,
}

/// One schema table row, as stored
///
/// Offsets stay raw text here; numeric coercion happens in the metadata cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub field_name: String,
    pub start_position: Option<String>,
    pub length: Option<String>,
    pub declared_type: Option<String>,
}

impl ColumnRow {
    /// Column at 1-based `start_position` spanning `length` characters
    pub fn new(field_name: &str, start_position: i64, length: i64, declared_type: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            start_position: Some(start_position.to_string()),
            length: Some(length.to_string()),
            declared_type: Some(declared_type.to_string()),
        }
    }
}

#[async_trait]
pub trait IngestStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Read every row of the schema registry
    async fn load_mappings(&self) -> Result<Vec<MappingRow>>;

    /// Read the column definitions of one schema table, in stored order
    async fn fetch_columns(&self, schema_table: &str) -> Result<Vec<ColumnRow>>;

    /// Open the transaction a whole file is loaded in
    async fn begin(&self) -> Result<Self::Transaction>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert all records into `table` after reading its live column set
    ///
    /// Returns the number of rows inserted.
    async fn insert_batch(&mut self, table: &str, records: &[DecodedRecord]) -> Result<u64>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Pick the insert column list for `records` given the table's live columns
///
/// Columns keep the table's ordinal order and only those used by at least one
/// record are listed. A record field the table does not have is an error.
pub fn insert_columns(
    table: &str,
    table_columns: &[String],
    records: &[DecodedRecord],
) -> Result<Vec<String>> {
    if table_columns.is_empty() {
        return Err(IngestError::MissingTable(table.to_string()));
    }

    let mut unknown: Vec<String> = Vec::new();
    for field in records.iter().flat_map(|record| record.keys()) {
        if !table_columns.iter().any(|c| c.eq_ignore_ascii_case(field))
            && !unknown.contains(field)
        {
            unknown.push(field.clone());
        }
    }
    if !unknown.is_empty() {
        return Err(IngestError::UnknownColumns {
            table: table.to_string(),
            columns: unknown,
        });
    }

    Ok(table_columns
        .iter()
        .filter(|column| {
            records
                .iter()
                .any(|record| record.keys().any(|f| f.eq_ignore_ascii_case(column)))
        })
        .cloned()
        .collect())
}

/// Value a record holds for `column`, matched case-insensitively
pub fn field_value<'r>(record: &'r DecodedRecord, column: &str) -> Option<&'r str> {
    record
        .get(column)
        .or_else(|| {
            record
                .iter()
                .find(|(field, _)| field.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}

/// Quote a table or schema name for MySQL
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('`') || name.contains('\0') {
        return Err(IngestError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("`{}`", name))
}
