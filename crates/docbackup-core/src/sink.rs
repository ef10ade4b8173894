//! Backup file format
//!
//! A backup file holds one collection as a JSON array, one compact document per
//! line:
//!
//! ```text
//! [
//! {"id":"1","name":"a"},
//! {"id":"2","name":"b"}
//! ]
//! ```
//!
//! [`RecordSink`] is the single writer for such a file. The container-end
//! marker is written on every exit path, so a file left behind by a cancelled
//! or failed run still parses.

use crate::error::{BackupError, Result};
use crate::store::Document;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extension of backup files
pub const BACKUP_EXTENSION: &str = "jsonbak";

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A backup file on disk, named after its collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    path: PathBuf,
    collection: String,
}

impl DataFile {
    /// Backup file for `collection` inside `folder`
    pub fn for_collection(folder: impl AsRef<Path>, collection: &str) -> Self {
        Self {
            path: folder
                .as_ref()
                .join(format!("{}.{}", collection, BACKUP_EXTENSION)),
            collection: collection.to_string(),
        }
    }

    /// List every backup file in `folder`, sorted by collection id
    pub fn list(folder: impl AsRef<Path>) -> Result<Vec<DataFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(folder.as_ref())? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(BACKUP_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let collection = stem.to_string();
            files.push(DataFile { path, collection });
        }
        files.sort_by(|a, b| a.collection.cmp(&b.collection));
        Ok(files)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Collection id the file was written for
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Open the file for writing, truncating any previous content
    pub fn begin_write(&self) -> Result<RecordSink> {
        RecordSink::begin_write(&self.path)
    }

    /// Read every document back, in file order
    pub fn read(&self) -> Result<Vec<Document>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let values: Vec<Value> = serde_json::from_reader(reader).map_err(|e| self.invalid(e))?;

        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match value {
                Value::Object(doc) => Ok(doc),
                other => Err(self.invalid(format!(
                    "record {} is a {} not an object",
                    index,
                    json_kind(&other)
                ))),
            })
            .collect()
    }

    fn invalid(&self, message: impl ToString) -> BackupError {
        BackupError::InvalidBackupFile {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Append-only writer for one backup file
///
/// A failed append poisons the sink: the file may end inside a record, so no
/// container-end marker is written after it and `close` reports the failure.
#[derive(Debug)]
pub struct RecordSink {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    records: u64,
    poisoned: bool,
}

impl RecordSink {
    /// Create (or truncate) `path` and write the container-start marker
    pub fn begin_write(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        writer.write_all(b"[")?;

        debug!("Opened backup file {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path,
            records: 0,
            poisoned: false,
        })
    }

    /// Append one document
    pub fn write(&mut self, record: &Document) -> Result<()> {
        if self.poisoned {
            return Err(self.incomplete());
        }
        let writer = self.writer.as_mut().ok_or_else(|| {
            BackupError::Io(std::io::Error::other(format!(
                "backup file {} is already closed",
                self.path.display()
            )))
        })?;

        let separator: &[u8] = if self.records == 0 { b"\n" } else { b",\n" };
        if let Err(e) = append(writer, separator, record) {
            self.poisoned = true;
            return Err(e);
        }
        self.records += 1;
        Ok(())
    }

    /// Append a batch of documents, returning how many were written
    pub fn write_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a Document>,
    ) -> Result<u64> {
        let before = self.records;
        for record in records {
            self.write(record)?;
        }
        Ok(self.records - before)
    }

    /// Number of records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an append failed part way through a record
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Write the container-end marker, flush and release the file
    pub fn close(mut self) -> Result<u64> {
        self.finish()?;
        Ok(self.records)
    }

    fn finish(&mut self) -> Result<()> {
        if self.poisoned {
            if self.writer.take().is_some() {
                warn!(
                    "Backup file {} is incomplete after a failed write, leaving it unterminated",
                    self.path.display()
                );
            }
            return Err(self.incomplete());
        }
        if let Some(mut writer) = self.writer.take() {
            writer.write_all(b"\n]\n")?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            debug!(
                "Closed backup file {} with {} records",
                self.path.display(),
                self.records
            );
        }
        Ok(())
    }

    fn incomplete(&self) -> BackupError {
        BackupError::Io(std::io::Error::other(format!(
            "backup file {} is incomplete after a failed write",
            self.path.display()
        )))
    }
}

fn append(writer: &mut BufWriter<File>, separator: &[u8], record: &Document) -> Result<()> {
    writer.write_all(separator)?;
    serde_json::to_writer(writer, record)?;
    Ok(())
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        match self.finish() {
            // finish already logged the unterminated file
            Err(_) if self.poisoned => {}
            Err(e) => warn!(
                "Failed to finalize backup file {}: {}",
                self.path.display(),
                e
            ),
            Ok(()) => {}
        }
    }
}
