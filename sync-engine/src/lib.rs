//! Sync Engine - 存储节点之间的文件版本同步
//!
//! # 架构概述
//!
//! 两条互补的路径把 source 上的不可变文件版本复制到 destination：
//!
//! - **实时通道** (`sync::publisher` / `sync::consumer`): 文件变更事件经消息代理
//!   的持久化队列组分发，至少投递一次，处理成功才确认
//! - **批量对账** (`sync::reconciler` / `sync::job`): 定时全量扫描，
//!   检查点之后的版本按时间顺序重放，修复实时通道漏掉的一切
//!
//! 两条路径共用 [`SyncHandlers`]，重复处理是无害的。
//!
//! # 模块结构
//!
//! ```text
//! sync-engine/src/
//! ├── core/          # 配置、错误、重试、后台任务、SyncNode
//! ├── catalog/       # 存储 API 抽象 + 内存实现
//! ├── checkpoint/    # 对账检查点 (redb)
//! ├── broker/        # 消息代理抽象 + 内存实现
//! ├── sync/          # 处理器、对账、发布、消费
//! ├── metrics.rs     # 耗时直方图
//! └── utils/         # 日志
//! ```

pub mod broker;
pub mod catalog;
pub mod checkpoint;
pub mod core;
pub mod metrics;
pub mod sync;
pub mod utils;

// Re-export 公共类型
pub use broker::{Broker, BrokerError, MemoryBroker};
pub use catalog::{CatalogClient, CatalogError, MemoryCatalog};
pub use checkpoint::{CheckpointStore, RedbCheckpointStore};
pub use core::{BackoffPolicy, SyncConfig, SyncDirection, SyncError, SyncNode};
pub use metrics::SyncResult;
pub use shared::{EventType, FileInfo, Operation};
pub use sync::{
    BatchReconciler, EventConsumer, EventPublisher, NullPublisher, ReconcileJob, ReconcileOptions,
    SyncHandlers,
};

// Re-export logger functions
pub use utils::logger::{init_from_config, init_logger, init_logger_with_file};
