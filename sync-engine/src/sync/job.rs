//! 对账任务 - 检查点 + 批量对账器
//!
//! 运行开始前记录时间 T，全部成功后才把检查点推进到 T。
//! 失败或取消时检查点不变，下次从同一位置重做（处理是幂等的）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::BatchReconciler;
use crate::checkpoint::{CheckpointStore, load_checkpoint, save_checkpoint};
use crate::core::Result;

/// 对账间隔下限，更小的值按此处理
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

pub struct ReconcileJob {
    name: String,
    reconciler: BatchReconciler,
    checkpoints: Arc<dyn CheckpointStore>,
    /// 定时运行与手动触发互斥
    running: Mutex<()>,
}

impl ReconcileJob {
    pub fn new(
        name: impl Into<String>,
        reconciler: BatchReconciler,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            name: name.into(),
            reconciler,
            checkpoints,
            running: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前检查点（从未成功运行时为 None）
    pub fn checkpoint(&self) -> Result<Option<DateTime<Utc>>> {
        load_checkpoint(self.checkpoints.as_ref(), &self.name)
    }

    /// 运行一次对账，成功时返回新的检查点
    pub async fn run_once(&self, token: &CancellationToken) -> Result<DateTime<Utc>> {
        let _running = self.running.lock().await;

        let started = Utc::now();
        let since = self.checkpoint()?.unwrap_or(DateTime::UNIX_EPOCH);
        tracing::info!(job = %self.name, since = %since, "Starting reconciliation");

        self.reconciler.sync(token, since).await?;

        save_checkpoint(self.checkpoints.as_ref(), &self.name, &started)?;
        tracing::info!(job = %self.name, checkpoint = %started, "Reconciliation complete");
        Ok(started)
    }

    /// 按固定间隔运行直到取消；首次运行立即开始
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        if interval < MIN_RECONCILE_INTERVAL {
            tracing::warn!(
                job = %self.name,
                interval_ms = interval.as_millis() as u64,
                "Reconcile interval too small, using {}s",
                MIN_RECONCILE_INTERVAL.as_secs()
            );
        }
        let mut ticker = tokio::time::interval(interval.max(MIN_RECONCILE_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(job = %self.name, "Reconcile job stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once(&token).await {
                        Ok(_) => {}
                        Err(e) if e.is_cancelled() => {
                            tracing::info!(job = %self.name, "Reconciliation interrupted: {e}");
                        }
                        Err(e) => {
                            tracing::error!(job = %self.name, error = %e, "Reconciliation failed, checkpoint unchanged");
                        }
                    }
                }
            }
        }
    }
}
