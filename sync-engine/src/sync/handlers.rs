//! Idempotent "apply one version" logic
//!
//! Both the batch reconciler and the event consumer funnel every unit of
//! work through [`SyncHandlers`]. Applying a version twice is harmless: the
//! destination checksum decides whether anything needs to move.

use std::sync::Arc;
use std::time::Instant;

use shared::catalog::{Operation, PutOutcome};
use shared::message::FileInfo;

use crate::catalog::CatalogClient;
use crate::core::{Result, SyncError};
use crate::metrics::{SyncResult, observe_handler};

/// Write/delete handlers for one sync direction
#[derive(Clone)]
pub struct SyncHandlers {
    source: Arc<dyn CatalogClient>,
    destination: Arc<dyn CatalogClient>,
}

impl SyncHandlers {
    pub fn new(source: Arc<dyn CatalogClient>, destination: Arc<dyn CatalogClient>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Dispatch on the version's operation
    pub async fn apply(&self, operation: Operation, info: &FileInfo) -> Result<SyncResult> {
        match operation {
            Operation::Write => {
                self.sync_file(&info.bucket_id, &info.file_id, &info.version)
                    .await
            }
            Operation::Delete => {
                self.sync_file_delete(&info.bucket_id, &info.file_id, &info.version)
                    .await
            }
        }
    }

    /// Copy a version from source to destination unless it is already there
    pub async fn sync_file(&self, bucket: &str, file: &str, version: &str) -> Result<SyncResult> {
        let started = Instant::now();
        let result = self.copy_version(bucket, file, version).await;
        observe_handler(Operation::Write, outcome(&result), started.elapsed());
        result
    }

    /// Record a deletion on the destination
    pub async fn sync_file_delete(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
    ) -> Result<SyncResult> {
        let started = Instant::now();
        let result = self.delete_version(bucket, file, version).await;
        observe_handler(Operation::Delete, outcome(&result), started.elapsed());
        result
    }

    async fn copy_version(&self, bucket: &str, file: &str, version: &str) -> Result<SyncResult> {
        let data = match self.source.get_version(bucket, file, version).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                // Source moved on (deleted or purged) before we got here
                tracing::debug!(bucket, file, version, "Source version gone, nothing to sync");
                return Ok(SyncResult::SyncNotNeeded);
            }
            Err(source) => {
                return Err(SyncError::Fetch {
                    bucket: bucket.to_string(),
                    file: file.to_string(),
                    version: version.to_string(),
                    source,
                });
            }
        };

        match self.destination.stat_version(bucket, file, version).await {
            Ok(existing) if existing.checksum == data.metadata.checksum => {
                tracing::debug!(bucket, file, version, "Destination already up to date");
                return Ok(SyncResult::SyncNotNeeded);
            }
            Ok(existing) => {
                log_conflict(bucket, file, version, &data.metadata.checksum, &existing.checksum);
                return Ok(SyncResult::SyncNotNeeded);
            }
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(SyncError::Inspect {
                    bucket: bucket.to_string(),
                    file: file.to_string(),
                    version: version.to_string(),
                    source,
                });
            }
        }

        let checksum = data.metadata.checksum.clone();
        match self.destination.put_version(bucket, file, version, data).await {
            Ok(PutOutcome::Created) => {
                tracing::info!(bucket, file, version, "Synced file version");
                Ok(SyncResult::Synced)
            }
            Ok(PutOutcome::AlreadyExists) => Ok(SyncResult::SyncNotNeeded),
            Err(e) if e.is_conflict() => {
                // Lost a race against another writer of the same version
                log_conflict(bucket, file, version, &checksum, &e.to_string());
                Ok(SyncResult::SyncNotNeeded)
            }
            Err(source) => Err(SyncError::Upload {
                bucket: bucket.to_string(),
                file: file.to_string(),
                version: version.to_string(),
                source,
            }),
        }
    }

    async fn delete_version(&self, bucket: &str, file: &str, version: &str) -> Result<SyncResult> {
        match self.destination.delete_version(bucket, file, version).await {
            Ok(()) => {
                tracing::info!(bucket, file, version, "Synced file deletion");
                Ok(SyncResult::Synced)
            }
            Err(e) if e.is_not_found() || e.is_conflict() => {
                tracing::debug!(bucket, file, version, reason = %e, "Deletion already applied");
                Ok(SyncResult::SyncNotNeeded)
            }
            Err(source) => Err(SyncError::Delete {
                bucket: bucket.to_string(),
                file: file.to_string(),
                version: version.to_string(),
                source,
            }),
        }
    }
}

fn outcome(result: &Result<SyncResult>) -> SyncResult {
    match result {
        Ok(r) => *r,
        Err(_) => SyncResult::Error,
    }
}

/// Versions are immutable, so a mismatch is never retried; it needs a human.
fn log_conflict(bucket: &str, file: &str, version: &str, source_checksum: &str, found: &str) {
    tracing::error!(
        bucket,
        file,
        version,
        source_checksum,
        destination = found,
        "Checksum conflict on immutable version, leaving destination untouched"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use chrono::{TimeZone, Utc};
    use shared::catalog::FileVersion;

    fn setup() -> (Arc<MemoryCatalog>, Arc<MemoryCatalog>, SyncHandlers) {
        let source = Arc::new(MemoryCatalog::new());
        let destination = Arc::new(MemoryCatalog::new());
        let handlers = SyncHandlers::new(source.clone(), destination.clone());
        (source, destination, handlers)
    }

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sync_file_uploads_once() {
        let (source, destination, handlers) = setup();
        source.write_version("b", "f", "v1", ts(1), "hello");

        assert_eq!(
            handlers.sync_file("b", "f", "v1").await.unwrap(),
            SyncResult::Synced
        );
        assert_eq!(
            handlers.sync_file("b", "f", "v1").await.unwrap(),
            SyncResult::SyncNotNeeded
        );

        assert_eq!(destination.version_count(), 1);
        assert_eq!(destination.content("b", "f", "v1"), Some(b"hello".to_vec()));
        assert_eq!(destination.versions("b", "f")[0].created, ts(1));
    }

    #[tokio::test]
    async fn test_sync_file_missing_on_source_is_noop() {
        let (_source, destination, handlers) = setup();

        assert_eq!(
            handlers.sync_file("b", "gone", "v9").await.unwrap(),
            SyncResult::SyncNotNeeded
        );
        assert_eq!(destination.version_count(), 0);
    }

    #[tokio::test]
    async fn test_checksum_conflict_is_terminal_success() {
        let (source, destination, handlers) = setup();
        source.write_version("b", "f", "v1", ts(1), "source bytes");
        destination.write_version("b", "f", "v1", ts(1), "different bytes");

        assert_eq!(
            handlers.sync_file("b", "f", "v1").await.unwrap(),
            SyncResult::SyncNotNeeded
        );
        assert_eq!(
            destination.content("b", "f", "v1"),
            Some(b"different bytes".to_vec())
        );
    }

    #[tokio::test]
    async fn test_delete_absorbs_not_found_and_conflict() {
        let (_source, destination, handlers) = setup();

        // File never reached the destination
        assert_eq!(
            handlers.sync_file_delete("b", "f", "v2").await.unwrap(),
            SyncResult::SyncNotNeeded
        );

        destination.write_version("b", "f", "v1", ts(1), "x");
        assert_eq!(
            handlers.sync_file_delete("b", "f", "v2").await.unwrap(),
            SyncResult::Synced
        );
        // Already recorded
        assert_eq!(
            handlers.sync_file_delete("b", "f", "v2").await.unwrap(),
            SyncResult::SyncNotNeeded
        );
    }

    #[tokio::test]
    async fn test_apply_dispatches_on_operation() {
        let (source, destination, handlers) = setup();
        let desc = source.write_version("b", "f", "v1", ts(1), "x");

        let info = FileInfo::new("b", "f", "v1");
        handlers.apply(Operation::Write, &info).await.unwrap();
        assert_eq!(destination.versions("b", "f").len(), 1);

        let delete = FileInfo::new("b", "f", "v2");
        handlers.apply(Operation::Delete, &delete).await.unwrap();
        let versions = destination.versions("b", "f");
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().any(|v| v.operation == Operation::Delete));

        // Re-uploading the exact source bytes keeps the destination unchanged
        let same = FileVersion {
            content: b"x".to_vec(),
            metadata: desc.metadata(),
        };
        assert_eq!(
            destination.put_version("b", "f", "v1", same).await.unwrap(),
            PutOutcome::AlreadyExists
        );
    }
}
