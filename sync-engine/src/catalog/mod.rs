//! Catalog client abstraction
//!
//! The storage API is consumed through [`CatalogClient`]; the same trait
//! describes both ends of a sync direction.
//!
//! ```text
//!   source CatalogClient ──list/get──▶ SyncHandlers ──stat/put/delete──▶ destination CatalogClient
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::catalog::{BucketDescriptor, FileDescriptor, FileVersion, PutOutcome, VersionMetadata};
use thiserror::Error;

pub mod memory;

pub use memory::MemoryCatalog;

/// Storage API error
///
/// `NotFound` and `Conflict` are part of the protocol: sync handlers absorb
/// them instead of failing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CatalogError::Conflict(_))
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Read/write access to one storage node
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_buckets(&self) -> CatalogResult<Vec<BucketDescriptor>>;

    /// Latest descriptor of each file, ascending by `created`.
    ///
    /// With `since`, only files whose latest version is strictly newer.
    async fn list_files(
        &self,
        bucket: &str,
        since: Option<DateTime<Utc>>,
    ) -> CatalogResult<Vec<FileDescriptor>>;

    /// Every version of a file, writes and deletes alike
    async fn list_versions(&self, bucket: &str, file: &str) -> CatalogResult<Vec<FileDescriptor>>;

    /// Content and metadata of a version; `NotFound` for deleted versions
    async fn get_version(&self, bucket: &str, file: &str, version: &str)
    -> CatalogResult<FileVersion>;

    /// Metadata only
    async fn stat_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
    ) -> CatalogResult<VersionMetadata>;

    /// Upload a version. `Conflict` when it exists with another checksum.
    async fn put_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
        data: FileVersion,
    ) -> CatalogResult<PutOutcome>;

    /// Record the deletion of a file as `version`.
    ///
    /// `NotFound` when the file is unknown, `Conflict` when already recorded.
    async fn delete_version(&self, bucket: &str, file: &str, version: &str) -> CatalogResult<()>;
}
