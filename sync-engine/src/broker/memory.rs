//! In-process broker with durable queue groups
//!
//! Each `(subject, queue group, durable name)` owns one queue shared by all of
//! its members, so a message reaches exactly one member per group. A
//! delivery that is not acknowledged within `ack_wait` goes back on the
//! queue flagged as redelivered. Group state outlives its members: messages
//! published while nobody is subscribed wait for the next member.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    Broker, BrokerError, BrokerResult, Delivery, MessageHandler, SubscribeOptions, Subscription,
};

#[derive(Debug)]
struct Message {
    id: Uuid,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Pending {
    message: Arc<Message>,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueGroup {
    subject: String,
    name: String,
    queue: Mutex<VecDeque<Pending>>,
    notify: Notify,
    members: AtomicUsize,
}

impl QueueGroup {
    fn new(subject: &str, name: String) -> Self {
        Self {
            subject: subject.to_string(),
            name,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            members: AtomicUsize::new(0),
        }
    }

    fn push(&self, pending: Pending) {
        self.queue.lock().push_back(pending);
        self.notify.notify_one();
    }

    /// Wait for the next message; competing members race for it
    async fn next(&self) -> Pending {
        loop {
            if let Some(pending) = self.queue.lock().pop_front() {
                return pending;
            }
            self.notify.notified().await;
        }
    }

    fn backlog(&self) -> usize {
        self.queue.lock().len()
    }
}

#[derive(Debug, Default)]
struct SubjectState {
    groups: DashMap<String, Arc<QueueGroup>>,
    /// Messages published before any group existed; also guards group creation
    held: Mutex<VecDeque<Arc<Message>>>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    subjects: DashMap<String, Arc<SubjectState>>,
}

/// One client connection; closing it stops only its own subscriptions
#[derive(Debug, Default)]
struct Connection {
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// 同进程消息代理
///
/// 克隆共享同一个连接；[`MemoryBroker::connect`] 打开一个新连接，
/// 队列组状态在所有连接之间共享。
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
    conn: Arc<Connection>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 打开到同一个代理的新连接
    pub fn connect(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            conn: Arc::new(Connection::default()),
        }
    }

    fn subject(&self, subject: &str) -> Arc<SubjectState> {
        self.inner
            .subjects
            .entry(subject.to_string())
            .or_default()
            .clone()
    }

    fn group(&self, subject: &str, key: String) -> Arc<QueueGroup> {
        let state = self.subject(subject);
        let mut held = state.held.lock();
        if let Some(group) = state.groups.get(&key) {
            return group.clone();
        }

        let group = Arc::new(QueueGroup::new(subject, key.clone()));
        // The first group of a subject takes over whatever was held for it
        for message in held.drain(..) {
            group.push(Pending {
                message,
                redelivered: false,
            });
        }
        state.groups.insert(key, group.clone());
        group
    }

    /// Messages waiting in a queue group (not counting in-flight deliveries)
    pub fn pending(&self, subject: &str, queue_group: &str, durable_name: &str) -> usize {
        self.inner
            .subjects
            .get(subject)
            .and_then(|s| {
                s.groups
                    .get(&group_key(queue_group, durable_name))
                    .map(|g| g.backlog())
            })
            .unwrap_or(0)
    }

    /// Active members of a queue group
    pub fn members(&self, subject: &str, queue_group: &str, durable_name: &str) -> usize {
        self.inner
            .subjects
            .get(subject)
            .and_then(|s| {
                s.groups
                    .get(&group_key(queue_group, durable_name))
                    .map(|g| g.members.load(Ordering::SeqCst))
            })
            .unwrap_or(0)
    }

    /// 当前连接是否已关闭
    pub fn is_closed(&self) -> bool {
        self.conn.closed.load(Ordering::SeqCst)
    }
}

fn group_key(queue_group: &str, durable_name: &str) -> String {
    format!("{queue_group}:{durable_name}")
}

/// Hand one message to the handler and arm its redelivery timer
async fn deliver(
    group: &Arc<QueueGroup>,
    pending: Pending,
    options: SubscribeOptions,
    handler: &Arc<dyn MessageHandler>,
) {
    let acked = CancellationToken::new();
    let delivery = Delivery::new(
        pending.message.id,
        group.subject.clone(),
        pending.message.data.clone(),
        pending.redelivered,
        acked.clone(),
    );

    let timer_group = group.clone();
    let message = pending.message.clone();
    // The timer belongs to the group, not the connection: an unacked delivery
    // goes back to the remaining members even if this member's connection closes.
    tokio::spawn(async move {
        tokio::select! {
            _ = acked.cancelled() => {}
            _ = tokio::time::sleep(options.ack_wait) => {
                tracing::debug!(
                    subject = %timer_group.subject,
                    group = %timer_group.name,
                    message_id = %message.id,
                    "Ack wait expired, redelivering"
                );
                timer_group.push(Pending { message, redelivered: true });
            }
        }
    });

    handler.handle(&delivery).await;

    if !options.manual_ack {
        delivery.ack();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, subject: &str, data: Vec<u8>) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let message = Arc::new(Message {
            id: Uuid::new_v4(),
            data,
        });

        let state = self.subject(subject);
        let mut held = state.held.lock();
        if state.groups.is_empty() {
            held.push_back(message);
            return Ok(());
        }
        for group in state.groups.iter() {
            group.push(Pending {
                message: message.clone(),
                redelivered: false,
            });
        }
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        durable_name: &str,
        options: SubscribeOptions,
        handler: Arc<dyn MessageHandler>,
    ) -> BrokerResult<Box<dyn Subscription>> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if subject.is_empty() || queue_group.is_empty() {
            return Err(BrokerError::Subscribe(
                "subject and queue group are required".to_string(),
            ));
        }

        let group = self.group(subject, group_key(queue_group, durable_name));
        group.members.fetch_add(1, Ordering::SeqCst);

        let token = self.conn.shutdown.child_token();
        let member_token = token.clone();
        let member_group = group.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = member_token.cancelled() => break,
                    pending = member_group.next() => {
                        deliver(&member_group, pending, options, &handler).await;
                    }
                }
            }
        });

        tracing::debug!(subject, queue_group, durable_name, "Queue subscription started");

        Ok(Box::new(MemorySubscription {
            group,
            token,
            active: AtomicBool::new(true),
            handle: Mutex::new(Some(handle)),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.conn.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Closing memory broker connection");
            self.conn.shutdown.cancel();
        }
        Ok(())
    }
}

struct MemorySubscription {
    group: Arc<QueueGroup>,
    token: CancellationToken,
    active: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.group.subject
    }

    async fn unsubscribe(&self) -> BrokerResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.token.cancel();
        self.group.members.fetch_sub(1, Ordering::SeqCst);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Err(e) if !e.is_cancelled() => {
                    tracing::error!(subject = %self.group.subject, error = ?e, "Subscription worker panicked");
                }
                _ => {}
            }
        }
        Ok(())
    }
}
