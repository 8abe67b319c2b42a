//! 同步模块
//!
//! ```text
//!                  ┌──────────────────┐
//!  file events ──▶ │  EventConsumer   │──┐
//!                  └──────────────────┘  │    ┌──────────────┐
//!                                        ├──▶ │ SyncHandlers │ ──▶ destination
//!                  ┌──────────────────┐  │    └──────────────┘
//!  timer ────────▶ │   ReconcileJob   │──┘
//!                  │ (BatchReconciler)│
//!                  └──────────────────┘
//! ```
//!
//! 实时通道（发布/消费）尽力而为，批量对账兜底：任何漏掉的事件都会在下一次
//! 对账时被补上。

pub mod consumer;
pub mod handlers;
pub mod job;
pub mod publisher;
pub mod reconciler;

pub use consumer::EventConsumer;
pub use handlers::SyncHandlers;
pub use job::{MIN_RECONCILE_INTERVAL, ReconcileJob};
pub use publisher::{BrokerPublisher, EventPublisher, NullPublisher, select_publisher};
pub use reconciler::{BatchReconciler, ReconcileOptions};
