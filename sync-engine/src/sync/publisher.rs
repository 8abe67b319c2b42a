//! 事件发布 - 实时同步通道的写端
//!
//! 没有可用的消息代理时使用 [`NullPublisher`]，由 [`select_publisher`] 在组装时
//! 一次性决定，调用方无需判断。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared::message::{EventType, FileInfo};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::broker::Broker;
use crate::core::{BackoffPolicy, Result, RetryError, SyncError};

/// 发布文件变更事件
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布一次，不重试
    async fn publish(&self, token: &CancellationToken, event: EventType, info: &FileInfo)
    -> Result<()>;

    /// 后台发布并按策略重试，立即返回
    ///
    /// 只有在发布器已关闭或载荷无法编码时返回错误；后台失败仅记录日志。
    fn publish_async_with_retries(
        &self,
        token: &CancellationToken,
        event: EventType,
        info: &FileInfo,
    ) -> Result<()>;

    /// 等待后台发布结束并释放连接（幂等）
    async fn close(&self) -> Result<()>;
}

/// 基于 [`Broker`] 的发布器
pub struct BrokerPublisher {
    broker: Arc<dyn Broker>,
    retry: BackoffPolicy,
    tracker: TaskTracker,
    closed: RwLock<bool>,
}

impl BrokerPublisher {
    pub fn new(broker: Arc<dyn Broker>, retry: BackoffPolicy) -> Self {
        Self {
            broker,
            retry,
            tracker: TaskTracker::new(),
            closed: RwLock::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(SyncError::PublisherClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for BrokerPublisher {
    async fn publish(
        &self,
        token: &CancellationToken,
        event: EventType,
        info: &FileInfo,
    ) -> Result<()> {
        self.ensure_open()?;
        let data = info.to_bytes()?;

        tokio::select! {
            _ = token.cancelled() => Err(SyncError::PublishCancelled),
            result = self.broker.publish(event.as_str(), data) => {
                result?;
                tracing::debug!(event = %event, file = %info, "Published file event");
                Ok(())
            }
        }
    }

    fn publish_async_with_retries(
        &self,
        token: &CancellationToken,
        event: EventType,
        info: &FileInfo,
    ) -> Result<()> {
        let data = info.to_bytes()?;

        // 读锁覆盖检查与 spawn，close() 之后不会再有新任务
        let closed = self.closed.read();
        if *closed {
            return Err(SyncError::PublisherClosed);
        }

        let broker = self.broker.clone();
        let policy = self.retry.clone();
        let token = token.clone();
        let info = info.clone();
        self.tracker.spawn(async move {
            let result = policy
                .retry(&token, "Publish file event", |_| {
                    let broker = broker.clone();
                    let data = data.clone();
                    async move { broker.publish(event.as_str(), data).await }
                })
                .await;

            match result {
                Ok(()) => tracing::debug!(event = %event, file = %info, "Published file event"),
                Err(RetryError::Exhausted { attempts, last }) => {
                    tracing::error!(
                        event = %event,
                        bucket = %info.bucket_id,
                        file = %info.file_id,
                        version = %info.version,
                        attempts,
                        error = %last,
                        "Giving up publishing file event, batch reconciliation will pick it up"
                    );
                }
                Err(RetryError::Cancelled) => {
                    tracing::warn!(event = %event, file = %info, "File event publish cancelled");
                }
            }
        });
        drop(closed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            tracing::info!(pending = self.tracker.len(), "Waiting for in-flight publishes");
        }
        self.tracker.wait().await;
        self.broker.close().await?;
        tracing::info!("Event publisher closed");
        Ok(())
    }
}

/// 消息代理不可用时的空实现：所有操作立即成功
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _: &CancellationToken, _: EventType, _: &FileInfo) -> Result<()> {
        Ok(())
    }

    fn publish_async_with_retries(
        &self,
        _: &CancellationToken,
        _: EventType,
        _: &FileInfo,
    ) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 按连接结果选择发布器
pub fn select_publisher(
    broker: Option<Arc<dyn Broker>>,
    retry: BackoffPolicy,
) -> Arc<dyn EventPublisher> {
    match broker {
        Some(broker) => Arc::new(BrokerPublisher::new(broker, retry)),
        None => {
            tracing::warn!("No message broker, file events will not be published");
            Arc::new(NullPublisher)
        }
    }
}
