//! 事件消费 - 实时同步通道的读端
//!
//! 每种事件类型一个持久化队列组（组名 = 持久名 = subject），多个节点共同消费，
//! 每条消息只会交给组内一个成员。处理成功才确认，失败的消息在 ack_wait 后重投。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::message::{EventType, FileInfo};
use tokio_util::sync::CancellationToken;

use super::SyncHandlers;
use crate::broker::{Broker, Delivery, MessageHandler, SubscribeOptions, Subscription};
use crate::core::{Result, SyncError};
use crate::metrics::{SyncResult, observe_consumer};

pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    handlers: SyncHandlers,
    ack_wait: Duration,
    subscriptions: Mutex<Vec<Box<dyn Subscription>>>,
    closed: AtomicBool,
    token: CancellationToken,
}

impl EventConsumer {
    /// 创建消费者；`token` 取消时自动关闭
    pub fn new(
        broker: Arc<dyn Broker>,
        handlers: SyncHandlers,
        ack_wait: Duration,
        token: CancellationToken,
    ) -> Arc<Self> {
        let consumer = Arc::new(Self {
            broker,
            handlers,
            ack_wait,
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            token: token.child_token(),
        });

        let watch = consumer.token.clone();
        let weak: Weak<Self> = Arc::downgrade(&consumer);
        tokio::spawn(async move {
            watch.cancelled().await;
            let Some(consumer) = weak.upgrade() else {
                return;
            };
            if let Err(e) = consumer.close().await {
                tracing::warn!(error = %e, "Failed to close event consumer");
            }
        });

        consumer
    }

    /// 加入 `event` 对应的持久化队列组
    pub async fn start_subscription(&self, event: EventType) -> Result<()> {
        if self.is_closed() {
            return Err(SyncError::ConsumerClosed);
        }

        let subject = event.as_str();
        let dispatcher = Arc::new(EventDispatcher {
            event,
            handlers: self.handlers.clone(),
        });
        let subscription = self
            .broker
            .queue_subscribe(
                subject,
                subject,
                subject,
                SubscribeOptions::manual(self.ack_wait),
                dispatcher,
            )
            .await?;

        // close() 先置位再取列表，这里在锁内检查即可
        let rejected = {
            let mut subscriptions = self.subscriptions.lock();
            if self.is_closed() {
                Some(subscription)
            } else {
                subscriptions.push(subscription);
                None
            }
        };
        if let Some(subscription) = rejected {
            if let Err(e) = subscription.unsubscribe().await {
                tracing::warn!(subject, error = %e, "Unsubscribe failed");
            }
            return Err(SyncError::ConsumerClosed);
        }

        tracing::info!(
            subject,
            ack_wait_secs = self.ack_wait.as_secs(),
            "Subscribed to file events"
        );
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 取消所有订阅并关闭连接（幂等）
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.token.cancel();

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            if let Err(e) = subscription.unsubscribe().await {
                tracing::warn!(subject = subscription.subject(), error = %e, "Unsubscribe failed");
            }
        }

        self.broker.close().await?;
        tracing::info!("Event consumer closed");
        Ok(())
    }
}

/// 单个订阅的消息处理器
struct EventDispatcher {
    event: EventType,
    handlers: SyncHandlers,
}

impl EventDispatcher {
    async fn process(&self, delivery: &Delivery) -> Result<SyncResult> {
        let info = FileInfo::from_bytes(&delivery.data)?;
        self.handlers.apply(self.event.operation(), &info).await
    }
}

#[async_trait]
impl MessageHandler for EventDispatcher {
    async fn handle(&self, delivery: &Delivery) {
        let started = Instant::now();
        let acked = match self.process(delivery).await {
            Ok(result) => {
                delivery.ack();
                tracing::debug!(
                    event = %self.event,
                    message_id = %delivery.id,
                    result = %result,
                    "Handled file event"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    event = %self.event,
                    message_id = %delivery.id,
                    redelivered = delivery.redelivered,
                    error = %e,
                    "Failed to handle file event, leaving it for redelivery"
                );
                false
            }
        };
        observe_consumer(self.event, acked, started.elapsed());
    }
}
