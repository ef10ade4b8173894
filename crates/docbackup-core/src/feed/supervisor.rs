//! Feed supervisor - one worker per collection, a shared shutdown trigger

use super::worker::{FeedWorker, WorkerOutcome, WorkerReport};
use crate::config::FeedConfig;
use crate::error::{BackupError, Result};
use crate::store::SharedDocumentStore;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Broadcasts a stop request to every worker of a run.
///
/// Firing more than once is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every worker to stop. Returns `false` if already fired.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("Requesting feed workers stop");
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Result of a feed run
#[derive(Debug)]
pub struct FeedReport {
    pub database: String,
    pub workers: Vec<WorkerReport>,
}

impl FeedReport {
    /// `true` when no worker faulted
    pub fn is_success(&self) -> bool {
        !self.workers.iter().any(|w| w.outcome.is_faulted())
    }

    /// Workers that stopped because of an error
    pub fn faulted(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| w.outcome.is_faulted())
    }

    pub fn records_written(&self) -> u64 {
        self.workers.iter().map(|w| w.records_written).sum()
    }

    pub fn worker(&self, collection: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.collection == collection)
    }
}

/// Runs one [`FeedWorker`] per collection of a database
pub struct FeedSupervisor {
    store: SharedDocumentStore,
    database: String,
    folder: PathBuf,
    config: FeedConfig,
    shutdown: ShutdownTrigger,
}

impl FeedSupervisor {
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
            shutdown: ShutdownTrigger::new(),
        }
    }

    /// Handle that stops the run from outside
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Start all workers and wait for every one of them to stop.
    ///
    /// `interrupt` resolving fires the shutdown trigger. Fails before starting
    /// any worker if the configuration is invalid or the database is missing.
    pub async fn run<F>(self, interrupt: F) -> Result<FeedReport>
    where
        F: Future<Output = ()>,
    {
        let span = info_span!("feed", database = %self.database);
        self.supervise(interrupt).instrument(span).await
    }

    async fn supervise<F>(self, interrupt: F) -> Result<FeedReport>
    where
        F: Future<Output = ()>,
    {
        self.config.validate_config()?;

        let database = self
            .store
            .find_database(&self.database)
            .await?
            .ok_or_else(|| BackupError::DatabaseNotFound(self.database.clone()))?;
        let collections = self.store.list_collections(&database).await?;
        if collections.is_empty() {
            warn!("Database '{}' has no collections to stream", database.id);
        }
        info!(
            "Streaming changes of {} collections from database '{}' into {}",
            collections.len(),
            database.id,
            self.folder.display()
        );

        let mut ids = Vec::with_capacity(collections.len());
        let mut tasks = Vec::with_capacity(collections.len());
        for collection in collections {
            let span = info_span!("worker", collection = %collection.id);
            ids.push(collection.id.clone());
            let worker = FeedWorker::new(
                self.store.clone(),
                collection,
                self.config.clone(),
                &self.folder,
                self.shutdown.child_token(),
            );
            tasks.push(tokio::spawn(worker.run().instrument(span)));
        }

        let joined = join_all(tasks);
        tokio::pin!(joined);
        tokio::pin!(interrupt);
        let mut interrupted = false;

        let results = loop {
            tokio::select! {
                results = &mut joined => break results,
                _ = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    self.shutdown.fire();
                }
            }
        };

        let workers = ids
            .into_iter()
            .zip(results)
            .map(|(collection, joined)| match joined {
                Ok(report) => report,
                Err(e) => {
                    error!("Worker for collection {} aborted: {}", collection, e);
                    WorkerReport {
                        outcome: WorkerOutcome::Faulted(BackupError::worker(
                            collection.clone(),
                            format!("task aborted: {}", e),
                        )),
                        collection,
                        records_written: 0,
                        continuations: HashMap::new(),
                    }
                }
            })
            .collect();

        let report = FeedReport {
            database: database.id,
            workers,
        };
        info!(
            "Change feed stopped: {} records written, {} workers faulted",
            report.records_written(),
            report.faulted().count()
        );
        Ok(report)
    }
}
