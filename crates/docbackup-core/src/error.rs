//! Error types for docbackup
//!
//! One error type is shared by the store traits, the backup file format and the
//! change-feed tailer so that provider failures flow unchanged into worker logs.

use thiserror::Error;

/// Result type alias for docbackup operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Errors that can occur while talking to the store or writing backup files
#[derive(Debug, Error)]
pub enum BackupError {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// The target database does not exist
    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),

    /// Resource not found (collection, document, range)
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failed
    #[error("authentication error: {0}")]
    Auth(String),

    /// Request rate too large
    #[error("throttled: {0}")]
    Throttled(String),

    /// Resource already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store returned an error response
    #[error("store error ({status}): {message}")]
    Store { status: u16, message: String },

    /// Network / transport error
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout waiting for response
    #[error("timeout: {0}")]
    Timeout(String),

    /// Data serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backup file has an unexpected shape
    #[error("invalid backup file {path}: {message}")]
    InvalidBackupFile { path: String, message: String },

    /// Feed worker task ended abnormally
    #[error("worker for collection '{collection}' failed: {message}")]
    Worker { collection: String, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackupError {
    /// Check if this error is transient (the tailer never retries, callers may)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Throttled(_) | Self::Timeout(_)
        ) || matches!(self, Self::Store { status, .. } if *status >= 500)
    }

    /// Check if this error means the resource already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a store error from a status code and message
    pub fn store(status: u16, msg: impl Into<String>) -> Self {
        Self::Store {
            status,
            message: msg.into(),
        }
    }

    /// Create a worker failure error
    pub fn worker(collection: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Worker {
            collection: collection.into(),
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::DatabaseNotFound("orders".to_string());
        assert_eq!(err.to_string(), "database 'orders' does not exist");

        let err = BackupError::store(503, "service unavailable");
        assert_eq!(err.to_string(), "store error (503): service unavailable");

        let err = BackupError::worker("users", "range listing failed");
        assert_eq!(
            err.to_string(),
            "worker for collection 'users' failed: range listing failed"
        );
    }

    #[test]
    fn test_retryable_check() {
        assert!(BackupError::connection("reset by peer").is_retryable());
        assert!(BackupError::Timeout("30s".to_string()).is_retryable());
        assert!(BackupError::Throttled("429".to_string()).is_retryable());
        assert!(BackupError::store(503, "busy").is_retryable());
        assert!(!BackupError::store(400, "bad request").is_retryable());
        assert!(!BackupError::config("bad config").is_retryable());
        assert!(!BackupError::Auth("bad key".to_string()).is_retryable());
    }

    #[test]
    fn test_conflict_check() {
        assert!(BackupError::Conflict("exists".to_string()).is_conflict());
        assert!(!BackupError::NotFound("missing".to_string()).is_conflict());
    }
}
