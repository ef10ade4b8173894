//! Document store abstractions
//!
//! The tailer, the full backup and the restore never talk to a concrete store.
//! They consume the read side ([`DocumentStore`]) and the write side
//! ([`DocumentWriter`]) through trait objects so the REST provider and the
//! in-memory test store are interchangeable.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A document as stored and emitted by the store.
///
/// Field order is preserved end to end (`serde_json` is built with
/// `preserve_order`).
pub type Document = Map<String, Value>;

/// A database resolved by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    /// Database id as reported by the store (original casing)
    pub id: String,
}

impl Database {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Resource link used to address the database (`dbs/{id}`)
    pub fn link(&self) -> String {
        format!("dbs/{}", self.id)
    }
}

/// A collection to back up, restore or tail.
///
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection id, also the output file stem
    pub id: String,
    /// Owning database id
    pub database: String,
}

impl Collection {
    pub fn new(database: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            database: database.into(),
        }
    }

    /// Resource link used to address the collection (`dbs/{db}/colls/{id}`)
    pub fn link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.id)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.id)
    }
}

/// A contiguous slice of a collection's keyspace with its own change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    /// Range identifier. Never reused by the store after a split or merge.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_inclusive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_exclusive: Option<String>,
}

impl PartitionRange {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            min_inclusive: None,
            max_exclusive: None,
        }
    }
}

/// Where a change read starts when no continuation is stored for the range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Replay the feed from the first retained change
    FromBeginning,
    /// Only deliver changes made after the first read
    #[default]
    FromNow,
}

impl StartPolicy {
    pub fn from_beginning(beginning: bool) -> Self {
        if beginning {
            Self::FromBeginning
        } else {
            Self::FromNow
        }
    }
}

/// One page of the partition-range listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangePage {
    pub ranges: Vec<PartitionRange>,
    /// Cursor for the next listing page, `None` when exhausted
    pub next_cursor: Option<String>,
}

/// One page of a range's change feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePage {
    pub records: Vec<Document>,
    /// Cursor to resume from. `None` leaves the stored continuation untouched.
    pub continuation: Option<String>,
    /// Whether another page is available right now
    pub has_more: bool,
}

/// One page of a full collection scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    /// Cursor for the next page, `None` when exhausted
    pub next_cursor: Option<String>,
}

/// Description of a collection to create during restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub id: String,
    /// Partition key path such as `/tenant`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key_path: Option<String>,
    /// Default time-to-live in seconds, `-1` keeps documents forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<i64>,
    /// Provisioned throughput (request units)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<u32>,
}

impl CollectionSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key_path: None,
            default_ttl: None,
            throughput: None,
        }
    }

    /// Partition on a top-level property (`key` becomes `/key`)
    pub fn with_partition_key(mut self, key: &str) -> Self {
        self.partition_key_path = Some(format!("/{}", key.trim_start_matches('/')));
        self
    }

    pub fn with_default_ttl(mut self, ttl: i64) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_throughput(mut self, throughput: Option<u32>) -> Self {
        self.throughput = throughput;
        self
    }
}

/// Read side of a document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Resolve a database by name, ignoring case
    async fn find_database(&self, name: &str) -> Result<Option<Database>>;

    /// List every collection of a database
    async fn list_collections(&self, database: &Database) -> Result<Vec<Collection>>;

    /// Read one page of a collection's partition-range listing
    async fn read_range_page(
        &self,
        collection: &Collection,
        cursor: Option<&str>,
    ) -> Result<RangePage>;

    /// Read one page of changes for a single partition range.
    ///
    /// `start` only applies when `continuation` is `None`.
    async fn read_change_page(
        &self,
        collection: &Collection,
        range_id: &str,
        continuation: Option<&str>,
        start: StartPolicy,
    ) -> Result<ChangePage>;

    /// Read one page of a full collection scan
    async fn read_document_page(
        &self,
        collection: &Collection,
        cursor: Option<&str>,
    ) -> Result<DocumentPage>;
}

/// Write side of a document store
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Create a database unless it already exists
    async fn create_database_if_not_exists(
        &self,
        name: &str,
        throughput: Option<u32>,
    ) -> Result<Database>;

    /// Create a collection unless it already exists
    async fn create_collection_if_not_exists(
        &self,
        database: &Database,
        spec: &CollectionSpec,
    ) -> Result<Collection>;

    /// Insert or replace a document
    async fn upsert_document(
        &self,
        collection: &Collection,
        document: &Document,
        partition_key: Option<&Value>,
    ) -> Result<()>;
}

/// Shared handle to a store's read side
pub type SharedDocumentStore = Arc<dyn DocumentStore>;

/// Shared handle to a store's write side
pub type SharedDocumentWriter = Arc<dyn DocumentWriter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_links() {
        let db = Database::new("Sales");
        assert_eq!(db.link(), "dbs/Sales");

        let coll = Collection::new("Sales", "orders");
        assert_eq!(coll.link(), "dbs/Sales/colls/orders");
        assert_eq!(coll.to_string(), "Sales/orders");
    }

    #[test]
    fn test_start_policy() {
        assert_eq!(StartPolicy::from_beginning(true), StartPolicy::FromBeginning);
        assert_eq!(StartPolicy::from_beginning(false), StartPolicy::FromNow);
        assert_eq!(StartPolicy::default(), StartPolicy::FromNow);
    }

    #[test]
    fn test_collection_spec_partition_key() {
        let spec = CollectionSpec::new("orders")
            .with_partition_key("tenant")
            .with_default_ttl(-1)
            .with_throughput(Some(400));
        assert_eq!(spec.partition_key_path.as_deref(), Some("/tenant"));
        assert_eq!(spec.default_ttl, Some(-1));
        assert_eq!(spec.throughput, Some(400));

        let spec = CollectionSpec::new("orders").with_partition_key("/tenant");
        assert_eq!(spec.partition_key_path.as_deref(), Some("/tenant"));
    }
}
