//! Full export of a database to backup files

use docbackup_core::prelude::*;
use std::path::PathBuf;
use tracing::{error, info};

/// Writes every collection of a database to `<collection>.jsonbak`
pub struct BackupOperation {
    store: SharedDocumentStore,
    database: String,
    folder: PathBuf,
}

impl BackupOperation {
    pub fn new(
        store: SharedDocumentStore,
        database: impl Into<String>,
        folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            folder: folder.into(),
        }
    }

    /// Returns `Ok(false)` when the database is missing or empty
    pub async fn execute(&self) -> Result<bool> {
        let Some(database) = self.store.find_database(&self.database).await? else {
            error!("Database {} does not exist", self.database);
            return Ok(false);
        };

        let collections = self.store.list_collections(&database).await?;
        if collections.is_empty() {
            error!("Database {} contains no collections", database.id);
            return Ok(false);
        }

        info!("Backing up database {} to {}", database.id, self.folder.display());
        for collection in &collections {
            info!("Backing up collection {}", collection.id);
            let count = self.backup_collection(collection).await?;
            info!(records = count, "Backed up {} documents from {}", count, collection.id);
        }

        Ok(true)
    }

    async fn backup_collection(&self, collection: &Collection) -> Result<u64> {
        let mut sink = DataFile::for_collection(&self.folder, &collection.id).begin_write()?;
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .store
                .read_document_page(collection, cursor.as_deref())
                .await?;
            sink.write_all(&page.documents)?;

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        sink.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbackup_core::testing::MemoryStore;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(id: u32) -> Document {
        match json!({ "id": id.to_string(), "n": id }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_backup_writes_every_page() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new()
            .with_collection("db", "orders")
            .with_collection("db", "users")
            .with_documents("orders", (0..5).map(doc).collect())
            .with_document_page_size(2);

        let ok = BackupOperation::new(Arc::new(store), "DB", dir.path())
            .execute()
            .await
            .unwrap();
        assert!(ok);

        let orders = DataFile::for_collection(dir.path(), "orders").read().unwrap();
        assert_eq!(orders.len(), 5);
        assert_eq!(orders[4]["id"], "4");
        assert!(DataFile::for_collection(dir.path(), "users")
            .read()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_backup_missing_database() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new().with_collection("other", "orders");

        let ok = BackupOperation::new(Arc::new(store), "db", dir.path())
            .execute()
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_backup_empty_database() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new().with_database("db");

        let ok = BackupOperation::new(Arc::new(store), "db", dir.path())
            .execute()
            .await
            .unwrap();
        assert!(!ok);
    }
}
