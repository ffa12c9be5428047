//! Schema registry
//!
//! Maps the source key found at fixed positions of every line to the schema
//! table describing its layout and the destination table it loads into. The
//! registry is read once per database and is immutable afterwards, so decoders
//! share it without locking.

use crate::extract::extract;
use crate::error::Result;
use crate::store::{IngestStore, MappingRow};
use std::collections::HashMap;
use tracing::{info, warn};

/// Source code: 3 characters at position 0
pub const SOURCE_CODE_SPAN: (usize, usize) = (0, 3);

/// Source id: 2 characters at position 11
pub const SOURCE_ID_SPAN: (usize, usize) = (11, 2);

/// Where a line's records are described and where they are loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMapping {
    pub schema_table: String,
    pub destination_table: String,
}

/// Result of looking up a line in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'r> {
    Known(&'r SchemaMapping),
    Unknown { source_key: String },
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    mappings: HashMap<String, SchemaMapping>,
}

impl SchemaRegistry {
    /// Build the registry from raw rows
    ///
    /// Rows missing either table name are dropped; lines with those keys then
    /// resolve as unknown. The first row wins when a key is repeated.
    pub fn from_rows(rows: impl IntoIterator<Item = MappingRow>) -> Self {
        let mut mappings = HashMap::new();

        for row in rows {
            let key = row.source_key.trim().to_string();
            let (Some(schema_table), Some(destination_table)) = (
                row.schema_table.filter(|t| !t.trim().is_empty()),
                row.destination_table.filter(|t| !t.trim().is_empty()),
            ) else {
                warn!(source_key = %key, "Registry row has no schema or destination table, ignoring");
                continue;
            };

            if mappings.contains_key(&key) {
                warn!(source_key = %key, "Duplicate registry key, keeping the first mapping");
                continue;
            }

            mappings.insert(
                key,
                SchemaMapping {
                    schema_table: schema_table.trim().to_string(),
                    destination_table: destination_table.trim().to_string(),
                },
            );
        }

        Self { mappings }
    }

    /// Read the registry from the store
    pub async fn load<S: IngestStore>(store: &S) -> Result<Self> {
        let registry = Self::from_rows(store.load_mappings().await?);
        info!(mappings = registry.len(), "Schema registry loaded");
        Ok(registry)
    }

    /// Source key of a line: source code followed by source id, each trimmed
    ///
    /// Short lines give a short key; this never fails.
    pub fn source_key(line: &str) -> String {
        let (code_start, code_len) = SOURCE_CODE_SPAN;
        let (id_start, id_len) = SOURCE_ID_SPAN;
        format!(
            "{}{}",
            extract(line, code_start, code_len),
            extract(line, id_start, id_len)
        )
    }

    pub fn resolve(&self, line: &str) -> Resolution<'_> {
        let source_key = Self::source_key(line);
        match self.mappings.get(&source_key) {
            Some(mapping) => Resolution::Known(mapping),
            None => Resolution::Unknown { source_key },
        }
    }

    pub fn get(&self, source_key: &str) -> Option<&SchemaMapping> {
        self.mappings.get(source_key)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn row(key: &str, schema: Option<&str>, dest: Option<&str>) -> MappingRow {
        MappingRow {
            source_key: key.to_string(),
            schema_table: schema.map(str::to_string),
            destination_table: dest.map(str::to_string),
        }
    }

    #[test]
    fn test_source_key_positions() {
        assert_eq!(SchemaRegistry::source_key("ABCxxxxxxxx01xyz"), "ABC01");
        assert_eq!(SchemaRegistry::source_key(&format!("{:<11}01", "ABC")), "ABC01");
    }

    #[test]
    fn test_source_key_of_short_line() {
        assert_eq!(SchemaRegistry::source_key("AB"), "AB");
        assert_eq!(SchemaRegistry::source_key("ABC000000001"), "ABC1");
        assert_eq!(SchemaRegistry::source_key(""), "");
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry =
            SchemaRegistry::from_rows(vec![row("ABC01", Some("ABC_META"), Some("abc_data"))]);

        match registry.resolve(&format!("{:<11}01 payload", "ABC")) {
            Resolution::Known(mapping) => {
                assert_eq!(mapping.schema_table, "ABC_META");
                assert_eq!(mapping.destination_table, "abc_data");
            },
            other => panic!("expected known mapping, got {:?}", other),
        }

        assert_eq!(
            registry.resolve(&format!("{:<11}99", "ZZZ")),
            Resolution::Unknown {
                source_key: "ZZZ99".to_string()
            }
        );
    }

    #[test]
    fn test_incomplete_and_duplicate_rows() {
        let registry = SchemaRegistry::from_rows(vec![
            row("ABC01", Some("ABC_META"), Some("abc_data")),
            row("ABC01", Some("OTHER_META"), Some("other_data")),
            row("DEF02", None, Some("def_data")),
            row("GHI03", Some("GHI_META"), Some("  ")),
        ]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("ABC01").unwrap().schema_table, "ABC_META");
        assert!(registry.get("DEF02").is_none());
        assert!(registry.get("GHI03").is_none());
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = MemoryStore::new()
            .with_mapping("ABC01", "ABC_META", "abc_data")
            .with_mapping("DEF02", "DEF_META", "def_data");

        let registry = SchemaRegistry::load(&store).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }
}
