//! Continuous change feed backup

use docbackup_core::prelude::*;
use std::future::Future;
use std::path::PathBuf;
use tracing::{error, warn};

/// Tails every collection of a database until interrupted
pub struct FeedOperation {
    store: SharedDocumentStore,
    database: String,
    folder: PathBuf,
    config: FeedConfig,
}

impl FeedOperation {
    pub fn new(
        store: SharedDocumentStore,
        database: impl Into<String>,
        folder: impl Into<PathBuf>,
        config: FeedConfig,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            folder: folder.into(),
            config,
        }
    }

    /// Run until Ctrl+C
    pub async fn execute(self) -> Result<bool> {
        self.execute_until(interrupted()).await
    }

    /// Run until `interrupt` resolves.
    ///
    /// Returns `Ok(false)` when the run could not start or a worker faulted.
    pub async fn execute_until<F>(self, interrupt: F) -> Result<bool>
    where
        F: Future<Output = ()>,
    {
        let supervisor = FeedSupervisor::new(self.store, self.database, self.folder, self.config);

        let report = match supervisor.run(interrupt).await {
            Ok(report) => report,
            Err(e @ (BackupError::DatabaseNotFound(_) | BackupError::Config(_))) => {
                error!("{}", e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        for worker in report.faulted() {
            if let WorkerOutcome::Faulted(e) = &worker.outcome {
                error!("Collection {} stopped with an error: {}", worker.collection, e);
            }
        }
        Ok(report.is_success())
    }
}

/// Resolves on the first Ctrl+C
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for Ctrl+C, stop the process to end the feed: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbackup_core::testing::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_feed_missing_database() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new().with_database("other");

        let ok = FeedOperation::new(Arc::new(store), "db", dir.path(), FeedConfig::default())
            .execute_until(std::future::pending())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_feed_invalid_config() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new().with_collection("db", "orders");
        let config = FeedConfig::default().with_wait_ms(0);

        let ok = FeedOperation::new(Arc::new(store), "db", dir.path(), config)
            .execute_until(std::future::pending())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_feed_stops_on_interrupt() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_ranges("orders", &["0"]);
        let config = FeedConfig::default().with_wait_ms(10);

        let ok = FeedOperation::new(Arc::new(store.clone()), "db", dir.path(), config)
            .execute_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(ok);
        assert!(!store.change_calls().is_empty());
        assert!(DataFile::for_collection(dir.path(), "orders")
            .read()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_feed_reports_worker_fault() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .fail_ranges_for("orders", "listing unavailable");

        let ok = FeedOperation::new(Arc::new(store), "db", dir.path(), FeedConfig::default())
            .execute_until(std::future::pending())
            .await
            .unwrap();
        assert!(!ok);
    }
}
