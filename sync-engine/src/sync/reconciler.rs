//! 批量对账 - 周期性全量扫描，修复实时通道漏掉的变更
//!
//! ```text
//! list_buckets ──► bucket task (≤ max_concurrent_buckets)
//!                    └── list_files ──► file task (并发)
//!                                         └── list_versions ──► apply (按 created 升序，串行)
//! ```
//!
//! 单个版本的失败只记录日志，逐级汇总为失败计数；取消时立即返回，
//! 不等待仍在运行的子任务。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use shared::catalog::FileDescriptor;
use shared::message::FileInfo;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

use super::SyncHandlers;
use crate::catalog::CatalogClient;
use crate::core::{Result, SyncError, SyncUnit};
use crate::metrics::observe_reconcile;

/// 对账选项
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub skip_buckets: HashSet<String>,
    pub skip_files: HashSet<String>,
    /// 带任一标签的文件跳过
    pub skip_labels: HashSet<String>,
    /// None = 不限制
    pub max_concurrent_buckets: Option<usize>,
    /// 列文件时按检查点过滤（源端支持时可大幅减少扫描量）
    pub list_files_since: bool,
}

/// 批量对账器
#[derive(Clone)]
pub struct BatchReconciler {
    source: Arc<dyn CatalogClient>,
    handlers: SyncHandlers,
    options: Arc<ReconcileOptions>,
    bucket_limit: Option<Arc<Semaphore>>,
}

type Outcome = (String, Result<()>);

impl BatchReconciler {
    pub fn new(
        source: Arc<dyn CatalogClient>,
        handlers: SyncHandlers,
        options: ReconcileOptions,
    ) -> Self {
        let bucket_limit = options
            .max_concurrent_buckets
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            source,
            handlers,
            options: Arc::new(options),
            bucket_limit,
        }
    }

    /// 同步所有 `created > since` 的版本
    pub async fn sync(&self, token: &CancellationToken, since: DateTime<Utc>) -> Result<()> {
        let started = Instant::now();
        let result = self.sync_buckets(token, since).await;
        observe_reconcile("run", result.is_ok(), started.elapsed());
        result
    }

    async fn sync_buckets(&self, token: &CancellationToken, since: DateTime<Utc>) -> Result<()> {
        if token.is_cancelled() {
            return Err(cancelled(0, 0, SyncUnit::Bucket));
        }

        let buckets = self
            .source
            .list_buckets()
            .await
            .map_err(SyncError::ListBuckets)?;

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for bucket in buckets {
            if self.options.skip_buckets.contains(&bucket.name) {
                tracing::debug!(bucket = %bucket.name, "Skipping bucket");
                continue;
            }
            let this = self.clone();
            let token = token.clone();
            let name = bucket.name;
            let handle = tasks.spawn({
                let name = name.clone();
                async move {
                    let result = this.sync_bucket(&token, &name, since).await;
                    (name, result)
                }
            });
            names.insert(handle.id(), name);
        }

        let total = names.len();
        let (outcomes, was_cancelled) = drain(&mut tasks, &names, token).await;
        let failed = count_failures(&outcomes, |name, e| {
            tracing::warn!(bucket = %name, error = %e, "Bucket sync failed");
        });

        if was_cancelled {
            return Err(cancelled(failed, total, SyncUnit::Bucket));
        }
        aggregate(failed, total, SyncUnit::Bucket)
    }

    async fn sync_bucket(
        &self,
        token: &CancellationToken,
        bucket: &str,
        since: DateTime<Utc>,
    ) -> Result<()> {
        // 持有许可直到整个 bucket 完成
        let _permit = match &self.bucket_limit {
            Some(limit) => tokio::select! {
                _ = token.cancelled() => return Err(cancelled(0, 0, SyncUnit::File)),
                permit = limit.clone().acquire_owned() => Some(
                    permit.map_err(|_| SyncError::Task("bucket limiter closed".into()))?,
                ),
            },
            None => None,
        };

        let started = Instant::now();
        let result = self.sync_files(token, bucket, since).await;
        observe_reconcile("bucket", result.is_ok(), started.elapsed());
        result
    }

    async fn sync_files(
        &self,
        token: &CancellationToken,
        bucket: &str,
        since: DateTime<Utc>,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(cancelled(0, 0, SyncUnit::File));
        }

        let filter = self.options.list_files_since.then_some(since);
        let files = self
            .source
            .list_files(bucket, filter)
            .await
            .map_err(|source| SyncError::ListFiles {
                bucket: bucket.to_string(),
                source,
            })?;

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for file in files {
            if self.skip_file(bucket, &file) {
                continue;
            }
            let this = self.clone();
            let token = token.clone();
            let bucket = bucket.to_string();
            let name = file.name;
            let handle = tasks.spawn({
                let name = name.clone();
                async move {
                    let started = Instant::now();
                    let result = this.sync_versions(&token, &bucket, &name, since).await;
                    observe_reconcile("file", result.is_ok(), started.elapsed());
                    (name, result)
                }
            });
            names.insert(handle.id(), name);
        }

        let total = names.len();
        let (outcomes, was_cancelled) = drain(&mut tasks, &names, token).await;
        let failed = count_failures(&outcomes, |name, e| {
            tracing::warn!(bucket, file = %name, error = %e, "File sync failed");
        });

        if was_cancelled {
            return Err(cancelled(failed, total, SyncUnit::File));
        }
        aggregate(failed, total, SyncUnit::File)
    }

    /// 单个文件的版本必须按时间顺序串行应用
    async fn sync_versions(
        &self,
        token: &CancellationToken,
        bucket: &str,
        file: &str,
        since: DateTime<Utc>,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(cancelled(0, 0, SyncUnit::Version));
        }

        let mut versions = self
            .source
            .list_versions(bucket, file)
            .await
            .map_err(|source| SyncError::ListVersions {
                bucket: bucket.to_string(),
                file: file.to_string(),
                source,
            })?;
        versions.retain(|v| v.created > since);
        versions.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.version.cmp(&b.version))
        });

        let total = versions.len();
        let mut failed = 0;
        for descriptor in &versions {
            if token.is_cancelled() {
                return Err(cancelled(failed, total, SyncUnit::Version));
            }
            let info = FileInfo::new(bucket, file, &descriptor.version);
            if let Err(e) = self.handlers.apply(descriptor.operation, &info).await {
                failed += 1;
                tracing::error!(
                    bucket,
                    file,
                    version = %descriptor.version,
                    operation = %descriptor.operation,
                    created = %descriptor.created,
                    error = %e,
                    "Failed to sync file version"
                );
            }
        }

        aggregate(failed, total, SyncUnit::Version)
    }

    fn skip_file(&self, bucket: &str, file: &FileDescriptor) -> bool {
        if self.options.skip_files.contains(&file.name) {
            tracing::debug!(bucket, file = %file.name, "Skipping file");
            return true;
        }
        if file.has_any_label(self.options.skip_labels.iter()) {
            tracing::debug!(bucket, file = %file.name, labels = ?file.labels, "Skipping labelled file");
            return true;
        }
        false
    }
}

/// 收集子任务结果；取消时中止剩余任务并立即返回已完成的部分
async fn drain(
    tasks: &mut JoinSet<Outcome>,
    names: &HashMap<Id, String>,
    token: &CancellationToken,
) -> (Vec<Outcome>, bool) {
    let mut outcomes = Vec::with_capacity(names.len());
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tasks.abort_all();
                return (sorted(outcomes), true);
            }
            next = tasks.join_next_with_id() => match next {
                None => return (sorted(outcomes), false),
                Some(Ok((_, outcome))) => outcomes.push(outcome),
                Some(Err(e)) => {
                    let name = names.get(&e.id()).cloned().unwrap_or_default();
                    outcomes.push((name, Err(SyncError::Task(e.to_string()))));
                }
            }
        }
    }
}

fn sorted(mut outcomes: Vec<Outcome>) -> Vec<Outcome> {
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}

fn count_failures(outcomes: &[Outcome], mut log: impl FnMut(&str, &SyncError)) -> usize {
    outcomes
        .iter()
        .filter_map(|(name, result)| result.as_ref().err().map(|e| (name, e)))
        .inspect(|(name, e)| log(name, e))
        .count()
}

fn aggregate(failed: usize, total: usize, unit: SyncUnit) -> Result<()> {
    if failed == 0 {
        Ok(())
    } else {
        Err(SyncError::Aggregate {
            failed,
            total,
            unit,
        })
    }
}

fn cancelled(failed: usize, total: usize, unit: SyncUnit) -> SyncError {
    SyncError::Cancelled {
        failed,
        total,
        unit,
    }
}
