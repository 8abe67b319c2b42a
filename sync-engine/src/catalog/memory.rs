//! In-process catalog
//!
//! Keeps every version of every file in memory with the same invariants a
//! real storage node has: versions are immutable, deletes are tombstone
//! versions, listings come back in ascending `created` order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use shared::catalog::{
    BucketDescriptor, FileDescriptor, FileVersion, Operation, PutOutcome, VersionMetadata,
};

use super::{CatalogClient, CatalogError, CatalogResult};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_ARCHETYPE: &str = "file";

#[derive(Debug)]
struct StoredVersion {
    descriptor: FileDescriptor,
    content: Vec<u8>,
}

#[derive(Debug)]
struct BucketState {
    created: DateTime<Utc>,
    files: BTreeMap<String, Vec<StoredVersion>>,
}

impl BucketState {
    fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            files: BTreeMap::new(),
        }
    }

    fn find(&self, file: &str, version: &str) -> Option<&StoredVersion> {
        self.files
            .get(file)?
            .iter()
            .find(|v| v.descriptor.version == version)
    }
}

/// Hex-encoded SHA-256 of `content`
pub fn checksum_of(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// In-memory [`CatalogClient`]
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    buckets: RwLock<BTreeMap<String, BucketState>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket (no-op if it exists)
    pub fn create_bucket(&self, name: &str, created: DateTime<Utc>) {
        self.buckets
            .write()
            .entry(name.to_string())
            .or_insert_with(|| BucketState::new(created));
    }

    /// Store a write version with default metadata, creating the bucket if needed
    pub fn write_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
        created: DateTime<Utc>,
        content: impl Into<Vec<u8>>,
    ) -> FileDescriptor {
        let content = content.into();
        let descriptor = FileDescriptor {
            name: file.to_string(),
            version: version.to_string(),
            created,
            operation: Operation::Write,
            checksum: checksum_of(&content),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            archetype: DEFAULT_ARCHETYPE.to_string(),
            size: content.len() as u64,
            labels: Vec::new(),
        };
        self.insert(bucket, descriptor.clone(), content);
        descriptor
    }

    /// Store a delete (tombstone) version at a given time
    pub fn tombstone(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
        created: DateTime<Utc>,
    ) -> FileDescriptor {
        let descriptor = tombstone_descriptor(file, version, created);
        self.insert(bucket, descriptor.clone(), Vec::new());
        descriptor
    }

    /// Store an arbitrary descriptor, replacing any version with the same ID
    pub fn insert(&self, bucket: &str, descriptor: FileDescriptor, content: Vec<u8>) {
        let mut buckets = self.buckets.write();
        let state = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketState::new(descriptor.created));
        let versions = state.files.entry(descriptor.name.clone()).or_default();
        versions.retain(|v| v.descriptor.version != descriptor.version);
        versions.push(StoredVersion {
            descriptor,
            content,
        });
    }

    /// All versions of a file in ascending `created` order (empty if unknown)
    pub fn versions(&self, bucket: &str, file: &str) -> Vec<FileDescriptor> {
        let buckets = self.buckets.read();
        let mut out: Vec<FileDescriptor> = buckets
            .get(bucket)
            .and_then(|b| b.files.get(file))
            .map(|vs| vs.iter().map(|v| v.descriptor.clone()).collect())
            .unwrap_or_default();
        sort_ascending(&mut out);
        out
    }

    /// Stored content of a write version
    pub fn content(&self, bucket: &str, file: &str, version: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.read();
        buckets
            .get(bucket)?
            .find(file, version)
            .filter(|v| v.descriptor.operation == Operation::Write)
            .map(|v| v.content.clone())
    }

    /// Total number of versions across all buckets
    pub fn version_count(&self) -> usize {
        self.buckets
            .read()
            .values()
            .flat_map(|b| b.files.values())
            .map(Vec::len)
            .sum()
    }
}

fn tombstone_descriptor(file: &str, version: &str, created: DateTime<Utc>) -> FileDescriptor {
    FileDescriptor {
        name: file.to_string(),
        version: version.to_string(),
        created,
        operation: Operation::Delete,
        checksum: String::new(),
        content_type: String::new(),
        archetype: String::new(),
        size: 0,
        labels: Vec::new(),
    }
}

fn sort_ascending(descriptors: &mut [FileDescriptor]) {
    descriptors.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.version.cmp(&b.version))
    });
}

fn not_found(bucket: &str, file: &str, version: &str) -> CatalogError {
    CatalogError::NotFound(format!("{bucket}/{file}@{version}"))
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn list_buckets(&self) -> CatalogResult<Vec<BucketDescriptor>> {
        Ok(self
            .buckets
            .read()
            .iter()
            .map(|(name, state)| BucketDescriptor {
                name: name.clone(),
                created: state.created,
            })
            .collect())
    }

    async fn list_files(
        &self,
        bucket: &str,
        since: Option<DateTime<Utc>>,
    ) -> CatalogResult<Vec<FileDescriptor>> {
        let buckets = self.buckets.read();
        let state = buckets
            .get(bucket)
            .ok_or_else(|| CatalogError::NotFound(format!("bucket {bucket}")))?;

        let mut latest: Vec<FileDescriptor> = state
            .files
            .values()
            .filter_map(|versions| {
                versions
                    .iter()
                    .map(|v| &v.descriptor)
                    .max_by(|a, b| {
                        a.created
                            .cmp(&b.created)
                            .then_with(|| a.version.cmp(&b.version))
                    })
                    .cloned()
            })
            .filter(|d| since.is_none_or(|ts| d.created > ts))
            .collect();
        sort_ascending(&mut latest);
        Ok(latest)
    }

    async fn list_versions(&self, bucket: &str, file: &str) -> CatalogResult<Vec<FileDescriptor>> {
        let buckets = self.buckets.read();
        let versions = buckets
            .get(bucket)
            .and_then(|b| b.files.get(file))
            .ok_or_else(|| CatalogError::NotFound(format!("{bucket}/{file}")))?;

        let mut out: Vec<FileDescriptor> = versions.iter().map(|v| v.descriptor.clone()).collect();
        sort_ascending(&mut out);
        Ok(out)
    }

    async fn get_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
    ) -> CatalogResult<FileVersion> {
        let buckets = self.buckets.read();
        let stored = buckets
            .get(bucket)
            .and_then(|b| b.find(file, version))
            .filter(|v| v.descriptor.operation == Operation::Write)
            .ok_or_else(|| not_found(bucket, file, version))?;

        Ok(FileVersion {
            content: stored.content.clone(),
            metadata: stored.descriptor.metadata(),
        })
    }

    async fn stat_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
    ) -> CatalogResult<VersionMetadata> {
        let buckets = self.buckets.read();
        buckets
            .get(bucket)
            .and_then(|b| b.find(file, version))
            .filter(|v| v.descriptor.operation == Operation::Write)
            .map(|v| v.descriptor.metadata())
            .ok_or_else(|| not_found(bucket, file, version))
    }

    async fn put_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
        data: FileVersion,
    ) -> CatalogResult<PutOutcome> {
        let mut buckets = self.buckets.write();
        let state = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| BucketState::new(data.metadata.created));

        if let Some(existing) = state.find(file, version) {
            if existing.descriptor.operation == Operation::Write
                && existing.descriptor.checksum == data.metadata.checksum
            {
                return Ok(PutOutcome::AlreadyExists);
            }
            return Err(CatalogError::Conflict(format!(
                "{bucket}/{file}@{version} exists with checksum {}",
                existing.descriptor.checksum
            )));
        }

        let metadata = data.metadata;
        let descriptor = FileDescriptor {
            name: file.to_string(),
            version: version.to_string(),
            created: metadata.created,
            operation: Operation::Write,
            checksum: metadata.checksum,
            content_type: metadata.content_type,
            archetype: metadata.archetype,
            size: metadata.size,
            labels: metadata.labels,
        };
        state
            .files
            .entry(file.to_string())
            .or_default()
            .push(StoredVersion {
                descriptor,
                content: data.content,
            });
        Ok(PutOutcome::Created)
    }

    async fn delete_version(&self, bucket: &str, file: &str, version: &str) -> CatalogResult<()> {
        let mut buckets = self.buckets.write();
        let versions = buckets
            .get_mut(bucket)
            .and_then(|b| b.files.get_mut(file))
            .ok_or_else(|| CatalogError::NotFound(format!("{bucket}/{file}")))?;

        if versions.iter().any(|v| v.descriptor.version == version) {
            return Err(CatalogError::Conflict(format!(
                "{bucket}/{file}@{version} already recorded"
            )));
        }

        versions.push(StoredVersion {
            descriptor: tombstone_descriptor(file, version, Utc::now()),
            content: Vec::new(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_list_files_returns_latest_ascending() {
        let catalog = MemoryCatalog::new();
        catalog.write_version("b", "late", "v1", t(1), "x");
        catalog.write_version("b", "late", "v2", t(30), "y");
        catalog.write_version("b", "early", "v1", t(10), "z");

        let files = catalog.list_files("b", None).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| (f.name.as_str(), f.version.as_str())).collect();
        assert_eq!(names, vec![("early", "v1"), ("late", "v2")]);

        let recent = catalog.list_files("b", Some(t(10))).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "late");
    }

    #[tokio::test]
    async fn test_get_version_of_tombstone_is_not_found() {
        let catalog = MemoryCatalog::new();
        catalog.write_version("b", "f", "v1", t(1), "data");
        catalog.tombstone("b", "f", "v2", t(2));

        assert!(catalog.get_version("b", "f", "v1").await.is_ok());
        let err = catalog.get_version("b", "f", "v2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_version_is_immutable() {
        let catalog = MemoryCatalog::new();
        let desc = catalog.write_version("b", "f", "v1", t(1), "data");

        let same = FileVersion {
            content: b"data".to_vec(),
            metadata: desc.metadata(),
        };
        assert_eq!(
            catalog.put_version("b", "f", "v1", same).await.unwrap(),
            PutOutcome::AlreadyExists
        );

        let mut other = desc.metadata();
        other.checksum = checksum_of(b"other");
        let err = catalog
            .put_version(
                "b",
                "f",
                "v1",
                FileVersion {
                    content: b"other".to_vec(),
                    metadata: other,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_version_outcomes() {
        let catalog = MemoryCatalog::new();
        assert!(
            catalog
                .delete_version("b", "f", "v2")
                .await
                .unwrap_err()
                .is_not_found()
        );

        catalog.write_version("b", "f", "v1", Utc::now() - Duration::hours(1), "data");
        catalog.delete_version("b", "f", "v2").await.unwrap();
        assert!(
            catalog
                .delete_version("b", "f", "v2")
                .await
                .unwrap_err()
                .is_conflict()
        );

        let versions = catalog.versions("b", "f");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].operation, Operation::Delete);
    }
}
