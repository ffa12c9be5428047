//! Concurrent decoding of one file
//!
//! Every line becomes its own task and at most `workers` run at once. Results
//! are gathered in completion order into per-table batches and a list of lines
//! that could not be decoded. A panicking task only costs its own line.

use crate::decoder::{DecodedRecord, LineDecoder, LineOutcome, NotInsertedReason};
use crate::error::{IngestError, Result};
use crate::store::IngestStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, warn};

/// A line held back from loading, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotInsertedLine {
    pub line: String,
    #[serde(flatten)]
    pub reason: NotInsertedReason,
}

/// Everything decoded from one file
///
/// The order of records within a table and of `not_inserted` follows task
/// completion and is not meaningful.
#[derive(Debug, Default)]
pub struct DecodedFile {
    pub records_by_table: BTreeMap<String, Vec<DecodedRecord>>,
    pub not_inserted: Vec<NotInsertedLine>,
    pub lines_read: usize,
    /// Blank or whitespace-only lines, also present in `not_inserted`
    pub blank_lines: usize,
}

impl DecodedFile {
    /// A file may be loaded only if every line was decoded
    pub fn passes_gate(&self) -> bool {
        self.not_inserted.is_empty()
    }

    pub fn decoded_count(&self) -> usize {
        self.records_by_table.values().map(Vec::len).sum()
    }
}

pub struct DecodeOrchestrator<S> {
    decoder: Arc<LineDecoder<S>>,
    workers: usize,
}

impl<S: IngestStore> DecodeOrchestrator<S> {
    pub fn new(decoder: Arc<LineDecoder<S>>, workers: usize) -> Self {
        Self {
            decoder,
            workers: workers.max(1),
        }
    }

    /// Decode all lines of a file
    ///
    /// Every line is classified, blank ones included; a blank line has an
    /// empty source key and is never loaded. Returns `Cancelled` if the token
    /// fires first, after aborting the decodes still in flight. Nothing outside
    /// memory has been touched at that point.
    pub async fn decode_lines(
        &self,
        lines: Vec<String>,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DecodedFile> {
        let mut decoded = DecodedFile {
            lines_read: lines.len(),
            ..DecodedFile::default()
        };

        decoded.blank_lines = lines.iter().filter(|line| line.trim().is_empty()).count();

        let instance_id: Arc<str> = Arc::from(instance_id);
        // Dropping `results` aborts every spawned decode that has not finished
        let mut results = stream::iter(lines)
            .map(|line| {
                let decoder = Arc::clone(&self.decoder);
                let instance_id = Arc::clone(&instance_id);
                let task_line = line.clone();
                let handle = AbortOnDropHandle::new(tokio::spawn(async move {
                    decoder.decode(&task_line, &instance_id).await
                }));
                async move { (line, handle.await) }
            })
            .buffer_unordered(self.workers);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(IngestError::Cancelled("decoding interrupted".to_string()));
                },
                next = results.next() => next,
            };
            let Some((line, joined)) = next else {
                break;
            };

            match joined {
                Ok(LineOutcome::Decoded { table, record }) => {
                    decoded
                        .records_by_table
                        .entry(table)
                        .or_default()
                        .push(record);
                },
                Ok(LineOutcome::NotInserted { line, reason }) => {
                    debug!(line = %line, reason = %reason, "Line not inserted");
                    decoded.not_inserted.push(NotInsertedLine { line, reason });
                },
                Err(join_error) => {
                    error!(line = %line, error = %join_error, "Unexpected error while decoding a line");
                    decoded.not_inserted.push(NotInsertedLine {
                        line,
                        reason: NotInsertedReason::DecodeFailed {
                            message: join_error.to_string(),
                        },
                    });
                },
            }
        }

        if !decoded.passes_gate() {
            warn!(
                not_inserted = decoded.not_inserted.len(),
                decoded = decoded.decoded_count(),
                "Lines could not be matched to metadata"
            );
        }

        Ok(decoded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metadata::MetadataCache;
    use crate::registry::SchemaRegistry;
    use crate::store::memory::MemoryTransaction;
    use crate::store::{ColumnRow, MappingRow, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn orchestrator(workers: usize) -> DecodeOrchestrator<MemoryStore> {
        let store = Arc::new(
            MemoryStore::new()
                .with_mapping("ABC01", "ABC_META", "abc_data")
                .with_mapping("DEF02", "DEF_META", "def_data")
                .with_schema_table("ABC_META", vec![ColumnRow::new("seq", 15, 4, "INT")])
                .with_schema_table("DEF_META", vec![ColumnRow::new("seq", 15, 4, "INT")]),
        );
        let registry = Arc::new(SchemaRegistry::load(store.as_ref()).await.unwrap());
        let decoder = Arc::new(LineDecoder::new(registry, Arc::new(MetadataCache::new(store))));
        DecodeOrchestrator::new(decoder, workers)
    }

    fn line(code: &str, id: &str, seq: usize) -> String {
        format!("{:<11}{} {:04}", code, id, seq)
    }

    #[tokio::test]
    async fn test_groups_records_by_table() {
        let orchestrator = orchestrator(8).await;
        let lines: Vec<String> = (0..50)
            .map(|i| if i % 2 == 0 { line("ABC", "01", i) } else { line("DEF", "02", i) })
            .collect();

        let decoded = orchestrator
            .decode_lines(lines, "RUN1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(decoded.passes_gate());
        assert_eq!(decoded.lines_read, 50);
        assert_eq!(decoded.records_by_table["abc_data"].len(), 25);
        assert_eq!(decoded.records_by_table["def_data"].len(), 25);

        // Completion order is arbitrary; compare as sets
        let mut seqs: Vec<String> = decoded.records_by_table["abc_data"]
            .iter()
            .map(|r| r["seq"].clone())
            .collect();
        seqs.sort();
        let expected: Vec<String> = (0..50).step_by(2).map(|i| format!("{:04}", i)).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn test_collects_unresolvable_lines_in_any_order() {
        let orchestrator = orchestrator(3).await;
        let bad_one = line("ZZZ", "99", 1);
        let bad_two = line("YYY", "98", 2);
        let lines = vec![line("ABC", "01", 0), bad_one.clone(), bad_two.clone()];

        let decoded = orchestrator
            .decode_lines(lines, "RUN1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!decoded.passes_gate());
        assert_eq!(decoded.decoded_count(), 1);

        let mut rejected: Vec<&str> = decoded.not_inserted.iter().map(|n| n.line.as_str()).collect();
        rejected.sort();
        let mut expected = vec![bad_one.as_str(), bad_two.as_str()];
        expected.sort();
        assert_eq!(rejected, expected);
    }

    #[tokio::test]
    async fn test_blank_lines_are_not_inserted() {
        let orchestrator = orchestrator(2).await;
        let lines = vec![line("ABC", "01", 0), String::new(), " ".repeat(20)];

        let decoded = orchestrator
            .decode_lines(lines, "RUN1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!decoded.passes_gate());
        assert_eq!(decoded.blank_lines, 2);
        assert_eq!(decoded.decoded_count(), 1);
        assert_eq!(decoded.not_inserted.len(), 2);
        assert!(decoded.not_inserted.iter().all(|n| {
            n.reason
                == NotInsertedReason::UnknownSourceKey {
                    source_key: String::new(),
                }
        }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orchestrator = orchestrator(2).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .decode_lines(vec![line("ABC", "01", 0)], "RUN1", &cancel)
            .await;
        assert!(matches!(result, Err(IngestError::Cancelled(_))));
    }

    /// Store whose column fetches never finish, counting those still alive
    #[derive(Clone, Default)]
    struct StallingStore {
        inner: MemoryStore,
        in_flight: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
    }

    struct InFlight(Arc<AtomicUsize>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl IngestStore for StallingStore {
        type Transaction = MemoryTransaction;

        async fn load_mappings(&self) -> Result<Vec<MappingRow>> {
            self.inner.load_mappings().await
        }

        async fn fetch_columns(&self, _schema_table: &str) -> Result<Vec<ColumnRow>> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight(Arc::clone(&self.in_flight));
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }

        async fn begin(&self) -> Result<MemoryTransaction> {
            self.inner.begin().await
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_decode_aborts_running_tasks() {
        let store = Arc::new(StallingStore {
            inner: MemoryStore::new().with_mapping("ABC01", "ABC_META", "abc_data"),
            ..StallingStore::default()
        });
        let registry = Arc::new(SchemaRegistry::load(store.as_ref()).await.unwrap());
        let decoder = Arc::new(LineDecoder::new(
            registry,
            Arc::new(MetadataCache::new(Arc::clone(&store))),
        ));
        let orchestrator = Arc::new(DecodeOrchestrator::new(decoder, 4));
        let lines: Vec<String> = (0..10).map(|i| line("ABC", "01", i)).collect();

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            let cancel = cancel.clone();
            async move { orchestrator.decode_lines(lines, "RUN1", &cancel).await }
        });

        for _ in 0..1000 {
            if store.in_flight.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 4);

        cancel.cancel();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(IngestError::Cancelled(_))));

        for _ in 0..1000 {
            if store.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
        // Lines past the first batch were never started
        assert_eq!(store.started.load(Ordering::SeqCst), 4);
    }
}
