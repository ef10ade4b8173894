//! Per-collection change feed worker
//!
//! A worker opens its collection's backup file and then loops:
//!
//! 1. **Discover** partition ranges (first cycle, then every
//!    `range_rescan_cycles` completed waits when that is non-zero)
//! 2. **Drain** every known range in catalog order until the store reports no
//!    more pages, appending records and advancing continuations
//! 3. **Wait** for `wait_ms`, the only point where cancellation interrupts
//!
//! Cancellation is also checked at the top of the loop and before each range,
//! but a page fetch that is already in flight always completes and is written.
//! The backup file is closed on every exit path.

use super::catalog::RangeCatalog;
use super::continuation::ContinuationStore;
use crate::config::FeedConfig;
use crate::error::{BackupError, Result};
use crate::sink::{DataFile, RecordSink};
use crate::store::{Collection, PartitionRange, SharedDocumentStore};
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How a worker ended
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Stopped after cancellation
    Cancelled,
    /// Stopped by an error during discovery, drain or file handling
    Faulted(BackupError),
}

impl WorkerOutcome {
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }
}

/// Final state of a worker
#[derive(Debug)]
pub struct WorkerReport {
    pub collection: String,
    /// Records appended to the backup file during the run
    pub records_written: u64,
    /// Continuations held when the worker stopped
    pub continuations: HashMap<String, String>,
    pub outcome: WorkerOutcome,
}

/// Streams one collection's change feed into its backup file
pub struct FeedWorker {
    store: SharedDocumentStore,
    collection: Collection,
    config: FeedConfig,
    file: DataFile,
    cancel: CancellationToken,
    ranges: Vec<PartitionRange>,
    continuations: ContinuationStore,
    discovered: bool,
    /// Completed waits since the last discovery
    cycles_since_discovery: u32,
}

impl FeedWorker {
    pub fn new(
        store: SharedDocumentStore,
        collection: Collection,
        config: FeedConfig,
        folder: &Path,
        cancel: CancellationToken,
    ) -> Self {
        let file = DataFile::for_collection(folder, &collection.id);
        Self {
            store,
            collection,
            config,
            file,
            cancel,
            ranges: Vec::new(),
            continuations: ContinuationStore::new(),
            discovered: false,
            cycles_since_discovery: 0,
        }
    }

    /// Backup file this worker writes
    pub fn file(&self) -> &DataFile {
        &self.file
    }

    /// Ranges known since the last discovery
    pub fn ranges(&self) -> &[PartitionRange] {
        &self.ranges
    }

    pub fn continuations(&self) -> &ContinuationStore {
        &self.continuations
    }

    /// Run until cancelled or faulted
    pub async fn run(mut self) -> WorkerReport {
        info!("Starting to stream collection {}", self.collection.id);

        let outcome = match self.file.begin_write() {
            Ok(mut sink) => {
                let streamed = self.stream(&mut sink).await;
                let records = sink.records();
                let closed = close_sink(sink).await;
                match (streamed, closed) {
                    (Err(e), _) | (Ok(()), Err(e)) => (records, WorkerOutcome::Faulted(e)),
                    (Ok(()), Ok(_)) => (records, WorkerOutcome::Cancelled),
                }
            }
            Err(e) => (0, WorkerOutcome::Faulted(e)),
        };
        let (records_written, outcome) = outcome;

        if let WorkerOutcome::Faulted(e) = &outcome {
            error!(
                collection = %self.collection.id,
                retryable = e.is_retryable(),
                "Unexpected error while streaming collection {}: {}",
                self.collection.id,
                e
            );
        }
        info!(
            records = records_written,
            "Finished streaming collection {}", self.collection.id
        );

        WorkerReport {
            collection: self.collection.id.clone(),
            records_written,
            continuations: self.continuations.snapshot(),
            outcome,
        }
    }

    async fn stream(&mut self, sink: &mut RecordSink) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            self.cycle(sink).await?;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Cancelled while waiting on collection {}", self.collection.id);
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.wait()) => {}
            }
        }
    }

    /// One Discover (when due) + Drain pass. Returns the records written.
    pub(crate) async fn cycle(&mut self, sink: &mut RecordSink) -> Result<u64> {
        if self.discovery_due() {
            self.discover().await?;
        }
        self.drain(sink).await
    }

    fn discovery_due(&mut self) -> bool {
        if !self.discovered {
            return true;
        }
        if self.config.range_rescan_cycles == 0 {
            return false;
        }

        self.cycles_since_discovery += 1;
        if self.cycles_since_discovery >= self.config.range_rescan_cycles {
            self.cycles_since_discovery = 0;
            true
        } else {
            false
        }
    }

    async fn discover(&mut self) -> Result<()> {
        let ranges = RangeCatalog::new(self.store.as_ref(), &self.collection)
            .read_all()
            .await?;

        let dropped = self
            .continuations
            .retain(ranges.iter().map(|r| r.id.as_str()));
        if dropped > 0 {
            debug!(
                "Dropped {} continuations of vanished ranges in {}",
                dropped, self.collection.id
            );
        }

        info!(
            ranges = ranges.len(),
            "Discovered {} partition ranges for collection {}",
            ranges.len(),
            self.collection.id
        );
        self.ranges = ranges;
        self.discovered = true;
        Ok(())
    }

    async fn drain(&mut self, sink: &mut RecordSink) -> Result<u64> {
        let start = self.config.start_policy();
        let mut written = 0u64;

        for range in &self.ranges {
            if self.cancel.is_cancelled() {
                break;
            }

            loop {
                let page = self
                    .store
                    .read_change_page(
                        &self.collection,
                        &range.id,
                        self.continuations.get(&range.id),
                        start,
                    )
                    .await?;

                written += sink.write_all(&page.records)?;
                if let Some(continuation) = page.continuation {
                    self.continuations.set(range.id.clone(), continuation);
                }
                if !page.has_more {
                    break;
                }
            }
        }

        if written > 0 {
            info!(
                records = written,
                "Wrote {} changes for collection {}", written, self.collection.id
            );
        }
        Ok(written)
    }
}

/// Final flush and fsync run on the blocking pool
async fn close_sink(sink: RecordSink) -> Result<u64> {
    let path = sink.path().display().to_string();
    tokio::task::spawn_blocking(move || sink.close())
        .await
        .map_err(|e| {
            BackupError::Io(std::io::Error::other(format!(
                "closing backup file {} failed: {}",
                path, e
            )))
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangePage, Document, StartPolicy};
    use crate::testing::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(id: &str) -> Document {
        match json!({ "id": id }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn worker(store: &MemoryStore, dir: &TempDir, config: FeedConfig) -> FeedWorker {
        FeedWorker::new(
            Arc::new(store.clone()),
            Collection::new("db", "orders"),
            config,
            dir.path(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_drain_writes_records_and_advances_continuations() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A", "B"])
            .with_change_page(
                "orders",
                "A",
                ChangePage {
                    records: vec![doc("1"), doc("2"), doc("3")],
                    continuation: Some("c1".to_string()),
                    has_more: false,
                },
            );
        let mut worker = worker(&store, &dir, FeedConfig::default());
        let mut sink = worker.file().begin_write().unwrap();

        let written = worker.cycle(&mut sink).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(worker.continuations().get("A"), Some("c1"));
        assert_eq!(worker.continuations().get("B"), None);

        sink.close().unwrap();
        assert_eq!(worker.file().read().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_follows_has_more() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"])
            .with_change_page(
                "orders",
                "A",
                ChangePage {
                    records: vec![doc("1")],
                    continuation: Some("c1".to_string()),
                    has_more: true,
                },
            )
            .with_change_page(
                "orders",
                "A",
                ChangePage {
                    records: vec![doc("2")],
                    continuation: Some("c2".to_string()),
                    has_more: false,
                },
            );
        let mut worker = worker(&store, &dir, FeedConfig::default());
        let mut sink = worker.file().begin_write().unwrap();

        assert_eq!(worker.cycle(&mut sink).await.unwrap(), 2);
        assert_eq!(worker.continuations().get("A"), Some("c2"));

        let calls = store.change_calls_for("orders");
        let continuations: Vec<Option<&str>> =
            calls.iter().map(|c| c.continuation.as_deref()).collect();
        assert_eq!(continuations, vec![None, Some("c1")]);
    }

    #[tokio::test]
    async fn test_empty_page_still_advances_continuation() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"])
            .with_change_page(
                "orders",
                "A",
                ChangePage {
                    records: vec![],
                    continuation: Some("etag-7".to_string()),
                    has_more: false,
                },
            );
        let mut worker = worker(&store, &dir, FeedConfig::default());
        let mut sink = worker.file().begin_write().unwrap();

        assert_eq!(worker.cycle(&mut sink).await.unwrap(), 0);
        assert_eq!(worker.continuations().get("A"), Some("etag-7"));
    }

    #[tokio::test]
    async fn test_start_policy_applies_without_continuation() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"])
            .with_change_page(
                "orders",
                "A",
                ChangePage {
                    records: vec![],
                    continuation: Some("c1".to_string()),
                    has_more: false,
                },
            );
        let config = FeedConfig::default().with_start_from_beginning(true);
        let mut worker = worker(&store, &dir, config);
        let mut sink = worker.file().begin_write().unwrap();

        worker.cycle(&mut sink).await.unwrap();
        worker.cycle(&mut sink).await.unwrap();

        let calls = store.change_calls_for("orders");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].start, StartPolicy::FromBeginning);
        assert_eq!(calls[0].continuation, None);
        assert_eq!(calls[1].continuation.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_no_rescan_discovers_once() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"]);
        let mut worker = worker(&store, &dir, FeedConfig::default());
        let mut sink = worker.file().begin_write().unwrap();

        for _ in 0..5 {
            worker.cycle(&mut sink).await.unwrap();
        }
        assert_eq!(store.range_page_calls("orders"), 1);
    }

    #[tokio::test]
    async fn test_rescan_interval_counts_cycles() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"]);
        let config = FeedConfig::default().with_range_rescan_cycles(3);
        let mut worker = worker(&store, &dir, config);
        let mut sink = worker.file().begin_write().unwrap();

        let mut discoveries = Vec::new();
        for _ in 0..7 {
            worker.cycle(&mut sink).await.unwrap();
            discoveries.push(store.range_page_calls("orders"));
        }
        // cycle 1 discovers, 2-3 reuse, 4 rediscovers, 5-6 reuse, 7 rediscovers
        assert_eq!(discoveries, vec![1, 1, 1, 2, 2, 2, 3]);
    }

    #[tokio::test]
    async fn test_rediscovery_preserves_and_prunes_continuations() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["0", "1"])
            .with_change_page(
                "orders",
                "0",
                ChangePage {
                    records: vec![doc("a")],
                    continuation: Some("z0".to_string()),
                    has_more: false,
                },
            )
            .with_change_page(
                "orders",
                "1",
                ChangePage {
                    records: vec![doc("b")],
                    continuation: Some("z1".to_string()),
                    has_more: false,
                },
            );
        let config = FeedConfig::default().with_range_rescan_cycles(1);
        let mut worker = worker(&store, &dir, config);
        let mut sink = worker.file().begin_write().unwrap();

        worker.cycle(&mut sink).await.unwrap();
        assert_eq!(worker.continuations().len(), 2);

        // range 1 splits into 2 and 3
        store.set_ranges("orders", &["0", "2", "3"]);
        worker.cycle(&mut sink).await.unwrap();

        let ids: Vec<&str> = worker.ranges().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2", "3"]);
        assert_eq!(worker.continuations().get("0"), Some("z0"));
        assert_eq!(worker.continuations().get("1"), None);
        assert_eq!(worker.continuations().get("2"), None);

        // surviving range resumes from its continuation, new ranges use the start policy
        let calls = store.change_calls_for("orders");
        let second_pass: Vec<(&str, Option<&str>)> = calls[2..]
            .iter()
            .map(|c| (c.range_id.as_str(), c.continuation.as_deref()))
            .collect();
        assert_eq!(
            second_pass,
            vec![("0", Some("z0")), ("2", None), ("3", None)]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_range_skips_remaining() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A", "B"]);
        let mut worker = worker(&store, &dir, FeedConfig::default());
        let mut sink = worker.file().begin_write().unwrap();

        worker.discover().await.unwrap();
        worker.cancel.cancel();
        assert_eq!(worker.drain(&mut sink).await.unwrap(), 0);
        assert!(store.change_calls_for("orders").is_empty());
    }

    #[tokio::test]
    async fn test_run_closes_file_after_cancel() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"])
            .with_change_page(
                "orders",
                "A",
                ChangePage {
                    records: vec![doc("1"), doc("2")],
                    continuation: Some("c1".to_string()),
                    has_more: false,
                },
            );
        let cancel = CancellationToken::new();
        let worker = FeedWorker::new(
            Arc::new(store.clone()),
            Collection::new("db", "orders"),
            FeedConfig::default().with_wait_ms(60_000),
            dir.path(),
            cancel.clone(),
        );
        let file = worker.file().clone();

        let handle = tokio::spawn(worker.run());
        while store.change_calls_for("orders").is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(matches!(report.outcome, WorkerOutcome::Cancelled));
        assert_eq!(report.records_written, 2);
        assert_eq!(report.continuations.get("A").map(String::as_str), Some("c1"));

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.ends_with("\n]\n"));
        assert_eq!(file.read().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drain_error_propagates() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["A"])
            .fail_changes_for("orders", "feed unavailable");
        let mut worker = worker(&store, &dir, FeedConfig::default());
        let mut sink = worker.file().begin_write().unwrap();

        let err = worker.cycle(&mut sink).await.unwrap_err();
        assert!(err.to_string().contains("feed unavailable"));
    }
}
