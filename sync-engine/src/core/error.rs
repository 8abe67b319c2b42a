use std::fmt;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::catalog::CatalogError;
use crate::checkpoint::CheckpointError;

/// Level at which failures are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncUnit {
    Version,
    File,
    Bucket,
}

impl fmt::Display for SyncUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncUnit::Version => write!(f, "version"),
            SyncUnit::File => write!(f, "file"),
            SyncUnit::Bucket => write!(f, "bucket"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to list source buckets: {0}")]
    ListBuckets(#[source] CatalogError),

    #[error("failed to list files of bucket {bucket}: {source}")]
    ListFiles {
        bucket: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to list versions of {bucket}/{file}: {source}")]
    ListVersions {
        bucket: String,
        file: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to fetch {bucket}/{file}@{version} from source: {source}")]
    Fetch {
        bucket: String,
        file: String,
        version: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to read destination metadata of {bucket}/{file}@{version}: {source}")]
    Inspect {
        bucket: String,
        file: String,
        version: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to upload {bucket}/{file}@{version}: {source}")]
    Upload {
        bucket: String,
        file: String,
        version: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to delete {bucket}/{file}@{version} on destination: {source}")]
    Delete {
        bucket: String,
        file: String,
        version: String,
        #[source]
        source: CatalogError,
    },

    /// Rolled-up failure count; per-item detail is logged where it happens
    #[error("{failed} failure(s) out of {total} {unit}(s) to sync")]
    Aggregate {
        failed: usize,
        total: usize,
        unit: SyncUnit,
    },

    #[error("sync cancelled with {failed} failure(s) out of {total} {unit}(s) to sync")]
    Cancelled {
        failed: usize,
        total: usize,
        unit: SyncUnit,
    },

    #[error("publish cancelled")]
    PublishCancelled,

    #[error("publisher is closed")]
    PublisherClosed,

    #[error("consumer is closed")]
    ConsumerClosed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid checkpoint {value:?}: {source}")]
    InvalidCheckpoint {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Whether this error comes from a cancelled token rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled { .. } | SyncError::PublishCancelled
        )
    }
}

/// Sync engine Result type
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_display() {
        let err = SyncError::Aggregate {
            failed: 1,
            total: 2,
            unit: SyncUnit::Bucket,
        };
        assert_eq!(err.to_string(), "1 failure(s) out of 2 bucket(s) to sync");
    }

    #[test]
    fn test_list_buckets_wraps_cause() {
        let err = SyncError::ListBuckets(CatalogError::Unavailable("timeout".into()));
        assert!(err.to_string().starts_with("failed to list source buckets"));
        assert!(err.to_string().contains("timeout"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_kinds() {
        let err = SyncError::Cancelled {
            failed: 0,
            total: 3,
            unit: SyncUnit::File,
        };
        assert!(err.is_cancelled());
        assert!(SyncError::PublishCancelled.is_cancelled());
    }
}
