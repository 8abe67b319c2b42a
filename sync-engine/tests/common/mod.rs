//! Test doubles shared by the integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use shared::catalog::{BucketDescriptor, FileDescriptor, FileVersion, PutOutcome, VersionMetadata};
use sync_engine::catalog::{CatalogClient, CatalogError, CatalogResult, MemoryCatalog};
use tokio_util::sync::CancellationToken;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Wraps a [`MemoryCatalog`], records calls and injects failures
#[derive(Default)]
pub struct RecordingCatalog {
    pub inner: MemoryCatalog,
    calls: Mutex<Vec<String>>,
    fail_list_buckets: AtomicBool,
    /// `bucket/file` whose versions cannot be fetched
    fail_fetch: Mutex<HashSet<String>>,
    /// Remaining transient fetch failures, any file
    flaky_fetches: AtomicUsize,
    cancel_on_list_files: Mutex<Option<CancellationToken>>,
}

impl RecordingCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn fail_list_buckets(&self) {
        self.fail_list_buckets.store(true, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, bucket: &str, file: &str) {
        self.fail_fetch.lock().insert(format!("{bucket}/{file}"));
    }

    pub fn flaky_fetches(&self, n: usize) {
        self.flaky_fetches.store(n, Ordering::SeqCst);
    }

    pub fn cancel_on_list_files(&self, token: CancellationToken) {
        *self.cancel_on_list_files.lock() = Some(token);
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl CatalogClient for RecordingCatalog {
    async fn list_buckets(&self) -> CatalogResult<Vec<BucketDescriptor>> {
        self.record("list_buckets".into());
        if self.fail_list_buckets.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("connection refused".into()));
        }
        self.inner.list_buckets().await
    }

    async fn list_files(
        &self,
        bucket: &str,
        since: Option<DateTime<Utc>>,
    ) -> CatalogResult<Vec<FileDescriptor>> {
        self.record(format!("list_files {bucket}"));
        if let Some(token) = self.cancel_on_list_files.lock().as_ref() {
            token.cancel();
        }
        self.inner.list_files(bucket, since).await
    }

    async fn list_versions(&self, bucket: &str, file: &str) -> CatalogResult<Vec<FileDescriptor>> {
        self.record(format!("list_versions {bucket}/{file}"));
        self.inner.list_versions(bucket, file).await
    }

    async fn get_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
    ) -> CatalogResult<FileVersion> {
        self.record(format!("get {bucket}/{file}@{version}"));
        if self.fail_fetch.lock().contains(&format!("{bucket}/{file}")) {
            return Err(CatalogError::Unavailable("read timeout".into()));
        }
        let flaky = self
            .flaky_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(CatalogError::Unavailable("transient".into()));
        }
        self.inner.get_version(bucket, file, version).await
    }

    async fn stat_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
    ) -> CatalogResult<VersionMetadata> {
        self.record(format!("stat {bucket}/{file}@{version}"));
        self.inner.stat_version(bucket, file, version).await
    }

    async fn put_version(
        &self,
        bucket: &str,
        file: &str,
        version: &str,
        data: FileVersion,
    ) -> CatalogResult<PutOutcome> {
        self.record(format!("put {bucket}/{file}@{version}"));
        self.inner.put_version(bucket, file, version, data).await
    }

    async fn delete_version(&self, bucket: &str, file: &str, version: &str) -> CatalogResult<()> {
        self.record(format!("delete {bucket}/{file}@{version}"));
        self.inner.delete_version(bucket, file, version).await
    }
}

/// Poll `check` until it holds or the deadline passes
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
