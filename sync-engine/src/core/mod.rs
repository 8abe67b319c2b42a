//! 核心模块 - 配置、错误、重试策略、后台任务和同步节点
//!
//! # 模块结构
//!
//! - [`SyncConfig`] - 同步节点配置
//! - [`SyncError`] - 同步错误
//! - [`BackoffPolicy`] - 指数退避重试
//! - [`BackgroundTasks`] - 后台任务管理
//! - [`SyncNode`] - 组装根：一个同步方向的全部组件

pub mod backoff;
pub mod config;
pub mod error;
pub mod node;
pub mod tasks;

pub use backoff::{BackoffPolicy, RetryError};
pub use config::SyncConfig;
pub use error::{Result, SyncError, SyncUnit};
pub use node::{SyncDirection, SyncNode};
pub use tasks::BackgroundTasks;
