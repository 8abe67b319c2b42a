//! Message broker abstraction
//!
//! Provides a pluggable transport layer for the real-time sync path:
//! ```text
//! ┌──────────────────┐   publish(subject)   ┌──────────────┐
//! │  EventPublisher  │ ───────────────────▶ │              │
//! └──────────────────┘                      │    Broker    │  ◄── 可插拔
//! ┌──────────────────┐   queue_subscribe    │    Trait     │
//! │  EventConsumer   │ ◀─────────────────── │              │
//! └──────────────────┘   Delivery + ack     └──────┬───────┘
//!                                                  │
//!                                          MemoryBroker (同进程)
//! ```
//!
//! Delivery is at-least-once: a message that is not acknowledged within the
//! subscription's ack wait is handed out again.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{BackoffPolicy, RetryError};

pub mod memory;

pub use memory::MemoryBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker connection closed")]
    Closed,

    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Options for a queue subscription
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Time a delivery may stay unacknowledged before it is redelivered
    pub ack_wait: Duration,
    /// When false the broker acks as soon as the handler returns
    pub manual_ack: bool,
}

impl SubscribeOptions {
    pub fn manual(ack_wait: Duration) -> Self {
        Self {
            ack_wait,
            manual_ack: true,
        }
    }
}

/// One message handed to a subscriber
#[derive(Debug)]
pub struct Delivery {
    pub id: Uuid,
    pub subject: String,
    pub data: Vec<u8>,
    /// Set when an earlier delivery of the same message was not acknowledged
    pub redelivered: bool,
    acked: CancellationToken,
}

impl Delivery {
    pub fn new(
        id: Uuid,
        subject: impl Into<String>,
        data: Vec<u8>,
        redelivered: bool,
        acked: CancellationToken,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            data,
            redelivered,
            acked,
        }
    }

    /// Acknowledge the message; it will not be redelivered
    pub fn ack(&self) {
        self.acked.cancel();
    }

    pub fn is_acked(&self) -> bool {
        self.acked.is_cancelled()
    }
}

/// Callback invoked for every delivery on a subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery);
}

/// Handle to an active subscription
#[async_trait]
pub trait Subscription: Send + Sync {
    fn subject(&self) -> &str;

    /// Stop receiving messages. Durable group state is kept by the broker.
    async fn unsubscribe(&self) -> BrokerResult<()>;
}

/// Durable publish/subscribe transport
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, subject: &str, data: Vec<u8>) -> BrokerResult<()>;

    /// Join the `queue_group` of `subject`; each message reaches one member.
    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        durable_name: &str,
        options: SubscribeOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> BrokerResult<Box<dyn Subscription>>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Connect at start-up, retrying with `policy`.
///
/// Returns `None` once attempts are exhausted (or `token` fires); callers
/// then run without the real-time path.
pub async fn connect_with_backoff<F, Fut>(
    policy: &BackoffPolicy,
    token: &CancellationToken,
    connect: F,
) -> Option<Arc<dyn Broker>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = BrokerResult<Arc<dyn Broker>>>,
{
    match policy.retry(token, "Broker connect", connect).await {
        Ok(broker) => {
            tracing::info!("Connected to message broker");
            Some(broker)
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::warn!(
                attempts,
                error = %last,
                "Message broker unreachable, real-time sync disabled"
            );
            None
        }
        Err(RetryError::Cancelled) => {
            tracing::info!("Broker connect cancelled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_backoff_recovers() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(10), 2.0);
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let broker = connect_with_backoff(&policy, &token, move |attempt| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(BrokerError::Unavailable("refused".into()))
                } else {
                    Ok(Arc::new(MemoryBroker::new()) as Arc<dyn Broker>)
                }
            }
        })
        .await;

        assert!(broker.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_backoff_degrades() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(10), 2.0);
        let token = CancellationToken::new();

        let broker = connect_with_backoff(&policy, &token, |_| async {
            Err(BrokerError::Unavailable("refused".into()))
        })
        .await;

        assert!(broker.is_none());
    }

    #[test]
    fn test_delivery_ack() {
        let delivery = Delivery::new(
            Uuid::new_v4(),
            "file_new",
            b"{}".to_vec(),
            false,
            CancellationToken::new(),
        );
        assert!(!delivery.is_acked());
        delivery.ack();
        assert!(delivery.is_acked());
    }
}
