//! Line classification and decoding
//!
//! A line is classified by its source key, its schema table's columns are
//! fetched (or taken from the cache), and each in-range column becomes a named
//! field of the record. Lines that cannot be classified come back as
//! [`LineOutcome::NotInserted`] carrying the original text.

use crate::extract::{char_len, extract, field_in_bounds};
use crate::metadata::{ColumnDefinition, MetadataCache};
use crate::registry::{Resolution, SchemaRegistry};
use crate::store::IngestStore;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Field name → trimmed text, in schema order
pub type DecodedRecord = IndexMap<String, String>;

/// Synthetic field stamped on every record of a file
pub const INSTANCE_ID_FIELD: &str = "instance_id";

/// Why a line was not decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotInsertedReason {
    UnknownSourceKey { source_key: String },
    MetadataUnavailable { schema_table: String },
    DecodeFailed { message: String },
}

impl std::fmt::Display for NotInsertedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotInsertedReason::UnknownSourceKey { source_key } => {
                write!(f, "no registry entry for source key {:?}", source_key)
            },
            NotInsertedReason::MetadataUnavailable { schema_table } => {
                write!(f, "no column metadata for schema table {}", schema_table)
            },
            NotInsertedReason::DecodeFailed { message } => write!(f, "decode failed: {}", message),
        }
    }
}

/// Result of decoding one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Decoded {
        table: String,
        record: DecodedRecord,
    },
    NotInserted {
        line: String,
        reason: NotInsertedReason,
    },
}

/// Decode `line` against `columns`
///
/// Columns without an offset or length, or whose range falls outside the
/// line, are left out of the record.
pub fn decode_fields(line: &str, columns: &[ColumnDefinition]) -> DecodedRecord {
    let line_len = char_len(line);
    let mut record = DecodedRecord::with_capacity(columns.len() + 1);

    for column in columns {
        let Some((start, length)) = column.span() else {
            continue;
        };
        if !field_in_bounds(line_len, start, length) {
            trace!(field = %column.field_name, start, length, line_len, "Field outside line, skipped");
            continue;
        }
        // Both fit in usize once the bounds check has passed
        let value = extract(line, start as usize, length as usize);
        record.insert(column.field_name.clone(), value.to_string());
    }

    record
}

/// Classifies and decodes lines against shared registry and cache state
pub struct LineDecoder<S> {
    registry: Arc<SchemaRegistry>,
    metadata: Arc<MetadataCache<S>>,
}

impl<S: IngestStore> LineDecoder<S> {
    pub fn new(registry: Arc<SchemaRegistry>, metadata: Arc<MetadataCache<S>>) -> Self {
        Self { registry, metadata }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub async fn decode(&self, line: &str, instance_id: &str) -> LineOutcome {
        let mapping = match self.registry.resolve(line) {
            Resolution::Known(mapping) => mapping,
            Resolution::Unknown { source_key } => {
                return LineOutcome::NotInserted {
                    line: line.to_string(),
                    reason: NotInsertedReason::UnknownSourceKey { source_key },
                };
            },
        };

        let Some(columns) = self.metadata.get(&mapping.schema_table).await else {
            return LineOutcome::NotInserted {
                line: line.to_string(),
                reason: NotInsertedReason::MetadataUnavailable {
                    schema_table: mapping.schema_table.clone(),
                },
            };
        };

        let mut record = decode_fields(line, &columns);
        record.insert(INSTANCE_ID_FIELD.to_string(), instance_id.to_string());

        LineOutcome::Decoded {
            table: mapping.destination_table.clone(),
            record,
        }
    }
}
