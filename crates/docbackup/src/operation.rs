//! Operation dispatch

use crate::backup::BackupOperation;
use crate::cli::Command;
use crate::feed::FeedOperation;
use crate::restore::RestoreOperation;
use docbackup_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A command ready to run against a store
pub enum Operation {
    Backup(BackupOperation),
    Restore(RestoreOperation),
    Feed(FeedOperation),
}

impl Operation {
    /// Bind a parsed command to a store
    pub fn new<S>(command: Command, store: Arc<S>, database: String, folder: PathBuf) -> Self
    where
        S: DocumentStore + DocumentWriter + 'static,
    {
        match command {
            Command::Backup => Self::Backup(BackupOperation::new(store, database, folder)),
            Command::Restore(args) => {
                Self::Restore(RestoreOperation::new(store, database, folder, args))
            }
            Command::Feed(args) => {
                Self::Feed(FeedOperation::new(store, database, folder, args.config()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Backup(_) => "backup",
            Self::Restore(_) => "restore",
            Self::Feed(_) => "feed",
        }
    }

    /// Run to completion.
    ///
    /// `Ok(false)` means the operation reported a failure it already logged.
    pub async fn execute(self) -> Result<bool> {
        debug!("Executing {} operation", self.name());
        match self {
            Self::Backup(op) => op.execute().await,
            Self::Restore(op) => op.execute().await,
            Self::Feed(op) => op.execute().await,
        }
    }
}
