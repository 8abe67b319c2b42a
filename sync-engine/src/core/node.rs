//! 同步节点 - 一个同步方向（source → destination）的组装根
//!
//! # 启动流程
//!
//! ```text
//! 1. 连接消息代理（指数退避，失败则降级）
//! 2. 选择发布器：BrokerPublisher / NullPublisher
//! 3. 有代理时为 EventConsumer 另开一个连接，订阅 file_new / file_update / file_delete
//! 4. 注册定时对账任务
//! ```
//!
//! 发布器和消费者各自持有并关闭自己的连接，任何一方关闭都不影响另一方。

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::message::EventType;
use tokio_util::sync::CancellationToken;

use super::{BackgroundTasks, Result, SyncConfig};
use crate::broker::{Broker, BrokerResult, connect_with_backoff};
use crate::catalog::CatalogClient;
use crate::checkpoint::{CheckpointStore, RedbCheckpointStore};
use crate::metrics::describe_metrics;
use crate::sync::{
    BatchReconciler, EventConsumer, EventPublisher, ReconcileJob, SyncHandlers, select_publisher,
};

/// 同步方向
#[derive(Clone)]
pub struct SyncDirection {
    pub source: Arc<dyn CatalogClient>,
    pub destination: Arc<dyn CatalogClient>,
}

impl SyncDirection {
    pub fn new(source: Arc<dyn CatalogClient>, destination: Arc<dyn CatalogClient>) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// 运行中的同步节点
pub struct SyncNode {
    config: SyncConfig,
    tasks: BackgroundTasks,
    job: Arc<ReconcileJob>,
    publisher: Arc<dyn EventPublisher>,
    consumer: Option<Arc<EventConsumer>>,
}

impl SyncNode {
    /// 组装并启动节点
    ///
    /// `connect` 每次调用尝试一次连接，参数为第几次尝试（从 1 开始）。
    pub async fn start<F, Fut>(
        config: SyncConfig,
        direction: SyncDirection,
        checkpoints: Arc<dyn CheckpointStore>,
        mut connect: F,
    ) -> Result<Self>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = BrokerResult<Arc<dyn Broker>>>,
    {
        describe_metrics();
        tracing::info!(
            job = %config.job_name,
            interval_secs = config.interval.as_secs(),
            "Starting sync node"
        );

        let mut tasks = BackgroundTasks::new();
        let shutdown = tasks.shutdown_token();

        let publisher_conn =
            connect_with_backoff(&config.broker_connect, &shutdown, &mut connect).await;
        let consumer_conn = if publisher_conn.is_some() {
            connect_with_backoff(&config.broker_connect, &shutdown, &mut connect).await
        } else {
            None
        };
        let handlers = SyncHandlers::new(direction.source.clone(), direction.destination);
        let publisher = select_publisher(publisher_conn, config.publish_retry.clone());

        let consumer = match consumer_conn {
            Some(broker) => {
                let consumer = EventConsumer::new(
                    broker,
                    handlers.clone(),
                    config.ack_wait,
                    shutdown.child_token(),
                );
                if let Err(e) = subscribe_all(&consumer).await {
                    tracing::error!(error = %e, "Failed to subscribe to file events");
                    shutdown.cancel();
                    if let Err(e) = publisher.close().await {
                        tracing::warn!(error = %e, "Failed to close event publisher");
                    }
                    return Err(e);
                }
                Some(consumer)
            }
            None => {
                tracing::warn!("Running without event consumer, batch reconciliation only");
                None
            }
        };

        let reconciler =
            BatchReconciler::new(direction.source, handlers, config.reconcile_options());
        let job = Arc::new(ReconcileJob::new(
            config.job_name.clone(),
            reconciler,
            checkpoints,
        ));

        let periodic = job.clone();
        let interval = config.interval;
        let token = shutdown.clone();
        tasks.spawn("reconcile_job", async move {
            periodic.run_periodic(interval, token).await;
        });
        tasks.log_summary();

        Ok(Self {
            config,
            tasks,
            job,
            publisher,
            consumer,
        })
    }

    /// 使用 `CHECKPOINT_DB_PATH` 指定的 redb 文件保存检查点
    pub async fn start_with_checkpoint_db<F, Fut>(
        config: SyncConfig,
        direction: SyncDirection,
        connect: F,
    ) -> Result<Self>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = BrokerResult<Arc<dyn Broker>>>,
    {
        let store = RedbCheckpointStore::open(&config.checkpoint_db_path)?;
        tracing::info!(path = %config.checkpoint_db_path, "Checkpoint store opened");
        Self::start(config, direction, Arc::new(store), connect).await
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 文件变更后由写入方调用
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    /// 消息代理不可用时为 None
    pub fn consumer(&self) -> Option<&Arc<EventConsumer>> {
        self.consumer.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.tasks.shutdown_token()
    }

    /// 立即运行一次对账（与定时任务互斥）
    pub async fn reconcile_now(&self) -> Result<DateTime<Utc>> {
        self.job.run_once(&self.tasks.shutdown_token()).await
    }

    pub fn checkpoint(&self) -> Result<Option<DateTime<Utc>>> {
        self.job.checkpoint()
    }

    /// 提前退出的后台任务数
    pub fn check_health(&self) -> usize {
        self.tasks.check_health()
    }

    /// 关闭顺序：发布器（等待在途发布）→ 消费者 → 后台任务
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(job = %self.config.job_name, "Shutting down sync node");

        let mut first_error = None;
        if let Err(e) = self.publisher.close().await {
            tracing::warn!(error = %e, "Failed to close event publisher");
            first_error.get_or_insert(e);
        }
        if let Some(consumer) = &self.consumer {
            if let Err(e) = consumer.close().await {
                tracing::warn!(error = %e, "Failed to close event consumer");
                first_error.get_or_insert(e);
            }
        }
        self.tasks.shutdown().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn subscribe_all(consumer: &EventConsumer) -> Result<()> {
    for event in EventType::ALL {
        consumer.start_subscription(event).await?;
    }
    Ok(())
}
