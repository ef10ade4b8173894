//! Import of backup files into a database

use crate::cli::RestoreArgs;
use docbackup_core::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

/// Throughput reserved per collection, parsed from `name:ru;name:ru`.
///
/// Collection names are matched without regard to case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedThroughput {
    entries: HashMap<String, u32>,
}

impl ReservedThroughput {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = HashMap::new();

        for segment in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let invalid = || {
                BackupError::config(format!(
                    "unexpected reserved throughput segment: {}",
                    segment
                ))
            };

            let mut parts = segment.split(':');
            let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(invalid());
            };
            let name = name.trim().to_lowercase();
            if name.is_empty() || entries.contains_key(&name) {
                return Err(invalid());
            }
            let throughput = value.trim().parse::<u32>().map_err(|_| invalid())?;
            entries.insert(name, throughput);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, collection: &str) -> Option<u32> {
        self.entries.get(&collection.to_lowercase()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Restores every `.jsonbak` file of a folder into a database
pub struct RestoreOperation {
    writer: SharedDocumentWriter,
    database: String,
    folder: PathBuf,
    options: RestoreArgs,
}

impl RestoreOperation {
    pub fn new(
        writer: SharedDocumentWriter,
        database: impl Into<String>,
        folder: impl Into<PathBuf>,
        options: RestoreArgs,
    ) -> Self {
        Self {
            writer,
            database: database.into(),
            folder: folder.into(),
            options,
        }
    }

    /// Returns `Ok(false)` on bad reserved throughput or when there is nothing to restore
    pub async fn execute(&self) -> Result<bool> {
        let reserved = match self.options.reserved_throughput.as_deref() {
            Some(raw) => match ReservedThroughput::parse(raw) {
                Ok(reserved) => reserved,
                Err(e) => {
                    error!("{}", e);
                    return Ok(false);
                }
            },
            None => ReservedThroughput::default(),
        };

        let database = self
            .writer
            .create_database_if_not_exists(&self.database, self.options.database_throughput)
            .await?;
        info!("Restoring database {}", database.id);

        let files = DataFile::list(&self.folder)?;
        if files.is_empty() {
            error!(
                "No *.{} files found in {}",
                docbackup_core::sink::BACKUP_EXTENSION,
                self.folder.display()
            );
            return Ok(false);
        }

        for file in &files {
            info!("Restoring collection {}", file.collection());
            let count = self.restore_file(&database, file, &reserved).await?;
            info!(records = count, "Restored {} objects", count);
        }

        Ok(true)
    }

    async fn restore_file(
        &self,
        database: &Database,
        file: &DataFile,
        reserved: &ReservedThroughput,
    ) -> Result<u64> {
        let mut spec = CollectionSpec::new(file.collection())
            .with_default_ttl(-1)
            .with_throughput(
                reserved
                    .get(file.collection())
                    .or(self.options.collection_throughput),
            );
        if let Some(key) = self.partition_key() {
            spec = spec.with_partition_key(key);
        }
        let collection = self
            .writer
            .create_collection_if_not_exists(database, &spec)
            .await?;

        let default_key = match (self.partition_key(), self.options.default_key.as_deref()) {
            (Some(key), Some(value)) if !value.is_empty() => Some((key, value)),
            _ => None,
        };

        let mut count = 0u64;
        for mut document in file.read()? {
            if let Some((key, value)) = default_key {
                if !document.contains_key(key) {
                    document.insert(key.to_string(), Value::String(value.to_string()));
                }
            }

            let partition_key = self.partition_key().and_then(|key| document.get(key)).cloned();
            self.writer
                .upsert_document(&collection, &document, partition_key.as_ref())
                .await?;
            count += 1;
        }

        Ok(count)
    }

    fn partition_key(&self) -> Option<&str> {
        self.options
            .partition_key
            .as_deref()
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reserved_throughput() {
        let reserved = ReservedThroughput::parse("orders:400; Users:800;").unwrap();
        assert_eq!(reserved.get("orders"), Some(400));
        assert_eq!(reserved.get("users"), Some(800));
        assert_eq!(reserved.get("ORDERS"), Some(400));
        assert_eq!(reserved.get("other"), None);

        assert!(ReservedThroughput::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_reject_bad_segments() {
        for raw in [
            "orders",
            "orders:abc",
            ":400",
            "orders:400:1",
            "orders:400;ORDERS:800",
            "orders:-5",
        ] {
            let err = ReservedThroughput::parse(raw).unwrap_err();
            assert!(
                err.to_string().contains("unexpected reserved throughput segment"),
                "{}",
                raw
            );
        }
    }
}
