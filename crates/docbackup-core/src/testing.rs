//! Testing utilities
//!
//! [`MemoryStore`] implements both store traits in memory. Databases,
//! collections, partition ranges, scripted change pages and documents are set
//! up with builder methods; every change read is recorded so tests can assert
//! which continuation and start policy a worker used.
//!
//! # Example
//!
//! ```rust,ignore
//! use docbackup_core::testing::MemoryStore;
//!
//! let store = MemoryStore::new()
//!     .with_collection("db", "orders")
//!     .with_ranges("orders", &["0", "1"])
//!     .with_changes("orders", "0", vec![doc], "c1");
//! ```

use crate::error::{BackupError, Result};
use crate::store::{
    ChangePage, Collection, CollectionSpec, Database, Document, DocumentPage, DocumentStore,
    DocumentWriter, PartitionRange, RangePage, StartPolicy,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

/// A recorded change read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCall {
    pub collection: String,
    pub range_id: String,
    pub continuation: Option<String>,
    pub start: StartPolicy,
}

/// A recorded upsert
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCall {
    pub document: Document,
    pub partition_key: Option<Value>,
}

#[derive(Debug, Default)]
struct State {
    databases: Vec<String>,
    collections: Vec<Collection>,
    ranges: HashMap<String, Vec<PartitionRange>>,
    range_page_size: usize,
    range_page_calls: HashMap<String, usize>,
    range_failures: HashMap<String, String>,
    changes: HashMap<(String, String), VecDeque<ChangePage>>,
    change_failures: HashMap<String, String>,
    change_calls: Vec<ChangeCall>,
    documents: HashMap<String, Vec<Document>>,
    document_page_size: usize,
    created_databases: Vec<(String, Option<u32>)>,
    created_collections: Vec<CollectionSpec>,
    upserts: HashMap<String, Vec<UpsertCall>>,
    upsert_failures: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct FetchGate {
    held: Mutex<bool>,
    started: Notify,
    release: Notify,
}

/// Scripted in-memory document store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    gate: Arc<FetchGate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty database
    pub fn with_database(self, name: &str) -> Self {
        {
            let mut state = self.state.lock();
            if !state.databases.iter().any(|d| d == name) {
                state.databases.push(name.to_string());
            }
        }
        self
    }

    /// Add a collection (and its database if missing)
    pub fn with_collection(self, database: &str, id: &str) -> Self {
        let this = self.with_database(database);
        this.state
            .lock()
            .collections
            .push(Collection::new(database, id));
        this
    }

    /// Set the partition ranges of a collection
    pub fn with_ranges(self, collection: &str, ids: &[&str]) -> Self {
        self.set_ranges(collection, ids);
        self
    }

    /// Page size of the range listing (0 = single page)
    pub fn with_range_page_size(self, size: usize) -> Self {
        self.state.lock().range_page_size = size;
        self
    }

    /// Queue one change page for a range
    pub fn with_change_page(self, collection: &str, range_id: &str, page: ChangePage) -> Self {
        self.push_change_page(collection, range_id, page);
        self
    }

    /// Queue a final page of records ending at `continuation`
    pub fn with_changes(
        self,
        collection: &str,
        range_id: &str,
        records: Vec<Document>,
        continuation: &str,
    ) -> Self {
        self.with_change_page(
            collection,
            range_id,
            ChangePage {
                records,
                continuation: Some(continuation.to_string()),
                has_more: false,
            },
        )
    }

    /// Make range listings of a collection fail
    pub fn fail_ranges_for(self, collection: &str, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .range_failures
            .insert(collection.to_string(), message.into());
        self
    }

    /// Make change reads of a collection fail
    pub fn fail_changes_for(self, collection: &str, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .change_failures
            .insert(collection.to_string(), message.into());
        self
    }

    /// Make upserts into a collection fail
    pub fn fail_upserts_for(self, collection: &str, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .upsert_failures
            .insert(collection.to_string(), message.into());
        self
    }

    /// Set the documents returned by a full scan
    pub fn with_documents(self, collection: &str, documents: Vec<Document>) -> Self {
        self.state
            .lock()
            .documents
            .insert(collection.to_string(), documents);
        self
    }

    /// Page size of full scans (0 = single page)
    pub fn with_document_page_size(self, size: usize) -> Self {
        self.state.lock().document_page_size = size;
        self
    }

    /// Replace the partition ranges of a collection (split/merge)
    pub fn set_ranges(&self, collection: &str, ids: &[&str]) {
        self.state.lock().ranges.insert(
            collection.to_string(),
            ids.iter().map(|id| PartitionRange::new(*id)).collect(),
        );
    }

    /// Queue one change page for a range
    pub fn push_change_page(&self, collection: &str, range_id: &str, page: ChangePage) {
        self.state
            .lock()
            .changes
            .entry((collection.to_string(), range_id.to_string()))
            .or_default()
            .push_back(page);
    }

    /// Every change read so far
    pub fn change_calls(&self) -> Vec<ChangeCall> {
        self.state.lock().change_calls.clone()
    }

    /// Change reads of one collection
    pub fn change_calls_for(&self, collection: &str) -> Vec<ChangeCall> {
        self.state
            .lock()
            .change_calls
            .iter()
            .filter(|c| c.collection == collection)
            .cloned()
            .collect()
    }

    /// Number of range listing pages read for a collection
    pub fn range_page_calls(&self, collection: &str) -> usize {
        self.state
            .lock()
            .range_page_calls
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Databases created through [`DocumentWriter`], with their throughput
    pub fn created_databases(&self) -> Vec<(String, Option<u32>)> {
        self.state.lock().created_databases.clone()
    }

    /// Collections created through [`DocumentWriter`]
    pub fn created_collections(&self) -> Vec<CollectionSpec> {
        self.state.lock().created_collections.clone()
    }

    /// Upserts into a collection
    pub fn upserted(&self, collection: &str) -> Vec<UpsertCall> {
        self.state
            .lock()
            .upserts
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Block change reads until [`MemoryStore::release_fetches`]
    pub fn hold_fetches(&self) {
        *self.gate.held.lock() = true;
    }

    /// Wait until a held change read has started
    pub async fn fetch_started(&self) {
        self.gate.started.notified().await;
    }

    /// Let held change reads complete
    pub fn release_fetches(&self) {
        *self.gate.held.lock() = false;
        self.gate.release.notify_one();
    }

    fn find_collection(&self, database: &str, id: &str) -> Option<Collection> {
        self.state
            .lock()
            .collections
            .iter()
            .find(|c| c.database == database && c.id == id)
            .cloned()
    }
}

fn page<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    size: usize,
) -> Result<(Vec<T>, Option<String>)> {
    let start = match cursor {
        Some(c) => c
            .parse::<usize>()
            .map_err(|_| BackupError::store(400, format!("invalid cursor '{}'", c)))?,
        None => 0,
    };
    if size == 0 {
        return Ok((items.get(start..).unwrap_or_default().to_vec(), None));
    }
    let end = (start + size).min(items.len());
    let slice = items.get(start..end).unwrap_or_default().to_vec();
    let next = (end < items.len()).then(|| end.to_string());
    Ok((slice, next))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_database(&self, name: &str) -> Result<Option<Database>> {
        Ok(self
            .state
            .lock()
            .databases
            .iter()
            .find(|d| d.eq_ignore_ascii_case(name))
            .map(Database::new))
    }

    async fn list_collections(&self, database: &Database) -> Result<Vec<Collection>> {
        Ok(self
            .state
            .lock()
            .collections
            .iter()
            .filter(|c| c.database == database.id)
            .cloned()
            .collect())
    }

    async fn read_range_page(
        &self,
        collection: &Collection,
        cursor: Option<&str>,
    ) -> Result<RangePage> {
        let mut state = self.state.lock();
        *state
            .range_page_calls
            .entry(collection.id.clone())
            .or_default() += 1;
        if let Some(message) = state.range_failures.get(&collection.id) {
            return Err(BackupError::connection(message.clone()));
        }

        let ranges = state.ranges.get(&collection.id).cloned().unwrap_or_default();
        let (ranges, next_cursor) = page(&ranges, cursor, state.range_page_size)?;
        Ok(RangePage { ranges, next_cursor })
    }

    async fn read_change_page(
        &self,
        collection: &Collection,
        range_id: &str,
        continuation: Option<&str>,
        start: StartPolicy,
    ) -> Result<ChangePage> {
        let held = *self.gate.held.lock();
        if held {
            self.gate.started.notify_one();
            self.gate.release.notified().await;
        }

        let mut state = self.state.lock();
        state.change_calls.push(ChangeCall {
            collection: collection.id.clone(),
            range_id: range_id.to_string(),
            continuation: continuation.map(str::to_string),
            start,
        });
        if let Some(message) = state.change_failures.get(&collection.id) {
            return Err(BackupError::connection(message.clone()));
        }

        Ok(state
            .changes
            .get_mut(&(collection.id.clone(), range_id.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn read_document_page(
        &self,
        collection: &Collection,
        cursor: Option<&str>,
    ) -> Result<DocumentPage> {
        let state = self.state.lock();
        let documents = state
            .documents
            .get(&collection.id)
            .cloned()
            .unwrap_or_default();
        let (documents, next_cursor) = page(&documents, cursor, state.document_page_size)?;
        Ok(DocumentPage {
            documents,
            next_cursor,
        })
    }
}

#[async_trait]
impl DocumentWriter for MemoryStore {
    async fn create_database_if_not_exists(
        &self,
        name: &str,
        throughput: Option<u32>,
    ) -> Result<Database> {
        let mut state = self.state.lock();
        if let Some(existing) = state.databases.iter().find(|d| d.eq_ignore_ascii_case(name)) {
            return Ok(Database::new(existing.clone()));
        }
        state.databases.push(name.to_string());
        state.created_databases.push((name.to_string(), throughput));
        Ok(Database::new(name))
    }

    async fn create_collection_if_not_exists(
        &self,
        database: &Database,
        spec: &CollectionSpec,
    ) -> Result<Collection> {
        if let Some(existing) = self.find_collection(&database.id, &spec.id) {
            return Ok(existing);
        }
        let collection = Collection::new(database.id.clone(), spec.id.clone());
        let mut state = self.state.lock();
        state.collections.push(collection.clone());
        state.created_collections.push(spec.clone());
        Ok(collection)
    }

    async fn upsert_document(
        &self,
        collection: &Collection,
        document: &Document,
        partition_key: Option<&Value>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.upsert_failures.get(&collection.id) {
            return Err(BackupError::store(400, message.clone()));
        }
        if !state.collections.iter().any(|c| c == collection) {
            return Err(BackupError::NotFound(collection.link()));
        }
        state
            .upserts
            .entry(collection.id.clone())
            .or_default()
            .push(UpsertCall {
                document: document.clone(),
                partition_key: partition_key.cloned(),
            });
        Ok(())
    }
}
