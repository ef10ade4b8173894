//! # docbackup-core
//!
//! Building blocks for backing up a partitioned document store to flat files.
//!
//! - [`store`] - read/write traits every provider implements
//! - [`sink`] - the `.jsonbak` file format and its single writer
//! - [`feed`] - the change feed tailer (per-collection workers, continuation
//!   tracking, range rediscovery, cooperative cancellation)
//! - [`testing`] - a scripted in-memory store
//!
//! ## Example
//!
//! ```rust,ignore
//! use docbackup_core::prelude::*;
//!
//! let supervisor = FeedSupervisor::new(store, "orders", "./backup", FeedConfig::default());
//! let report = supervisor
//!     .run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! assert!(report.is_success());
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod sink;
pub mod store;
pub mod testing;

pub use config::FeedConfig;
pub use error::{BackupError, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::config::FeedConfig;
    pub use crate::error::{BackupError, Result};
    pub use crate::feed::{FeedReport, FeedSupervisor, ShutdownTrigger, WorkerOutcome};
    pub use crate::sink::{DataFile, RecordSink};
    pub use crate::store::{
        ChangePage, Collection, CollectionSpec, Database, Document, DocumentPage, DocumentStore,
        DocumentWriter, PartitionRange, RangePage, SharedDocumentStore, SharedDocumentWriter,
        StartPolicy,
    };
}
