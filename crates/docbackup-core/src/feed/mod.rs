//! Change feed tailing
//!
//! [`FeedSupervisor`] starts one [`FeedWorker`] task per collection. Each worker
//! owns its [`RangeCatalog`] view, its [`ContinuationStore`] and its backup
//! file; nothing mutable is shared between workers. A single
//! [`ShutdownTrigger`] cancels all of them.

mod catalog;
mod continuation;
mod supervisor;
mod worker;

pub use catalog::RangeCatalog;
pub use continuation::ContinuationStore;
pub use supervisor::{FeedReport, FeedSupervisor, ShutdownTrigger};
pub use worker::{FeedWorker, WorkerOutcome, WorkerReport};
