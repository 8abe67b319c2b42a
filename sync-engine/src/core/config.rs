use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use super::BackoffPolicy;
use crate::sync::{MIN_RECONCILE_INTERVAL, ReconcileOptions};

/// 同步节点配置 - 同步引擎的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | SYNC_JOB_NAME | local-to-cloud | 同步任务名（检查点键） |
/// | SYNC_INTERVAL_SECS | 300 | 批量对账间隔(秒)，最小 1 |
/// | SYNC_MAX_CONCURRENT_BUCKETS | 8 | 并发 bucket 上限 (0 = 不限) |
/// | SYNC_LIST_FILES_SINCE | true | 列文件时是否按检查点过滤 |
/// | SYNC_SKIP_BUCKETS | (空) | 跳过的 bucket，逗号分隔 |
/// | SYNC_SKIP_FILES | (空) | 跳过的文件，逗号分隔 |
/// | SYNC_SKIP_LABELS | (空) | 跳过带这些标签的文件 |
/// | BROKER_ACK_WAIT_SECS | 30 | 消息确认超时(秒) |
/// | BROKER_CONNECT_ATTEMPTS | 5 | 启动时连接消息代理的次数 |
/// | BROKER_CONNECT_DELAY_MS | 500 | 首次重连间隔(毫秒) |
/// | BROKER_CONNECT_MULTIPLIER | 2.0 | 重连间隔倍数 |
/// | BROKER_CONNECT_MAX_DELAY_MS | 30000 | 重连间隔上限(毫秒) |
/// | PUBLISH_MAX_ATTEMPTS | 5 | 异步发布重试次数 |
/// | PUBLISH_RETRY_DELAY_MS | 200 | 首次重试间隔(毫秒) |
/// | PUBLISH_RETRY_MULTIPLIER | 2.0 | 重试间隔倍数 |
/// | PUBLISH_RETRY_MAX_DELAY_MS | 10000 | 重试间隔上限(毫秒) |
/// | CHECKPOINT_DB_PATH | sync-checkpoints.redb | 检查点数据库路径 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (空) | 日志目录，为空时只输出到终端 |
/// | LOG_JSON | false | 输出 JSON 格式日志 |
///
/// # 示例
///
/// ```ignore
/// SYNC_JOB_NAME=cloud-to-local SYNC_INTERVAL_SECS=60 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 同步任务名，同时作为检查点的键
    pub job_name: String,
    /// 批量对账间隔
    pub interval: Duration,
    /// 同时处理的 bucket 上限
    pub max_concurrent_buckets: Option<usize>,
    /// 列文件时传入检查点时间
    pub list_files_since: bool,
    pub skip_buckets: HashSet<String>,
    pub skip_files: HashSet<String>,
    pub skip_labels: HashSet<String>,

    // === 消息代理 ===
    /// 未确认消息的重投超时
    pub ack_wait: Duration,
    /// 启动时连接消息代理的重试策略
    pub broker_connect: BackoffPolicy,
    /// 异步发布的重试策略
    pub publish_retry: BackoffPolicy,

    /// 检查点数据库路径
    pub checkpoint_db_path: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub log_json: bool,
}

impl SyncConfig {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        let max_concurrent_buckets: usize = env_or("SYNC_MAX_CONCURRENT_BUCKETS", 8);

        Self {
            job_name: std::env::var("SYNC_JOB_NAME").unwrap_or_else(|_| "local-to-cloud".into()),
            interval: Duration::from_secs(env_or("SYNC_INTERVAL_SECS", 300))
                .max(MIN_RECONCILE_INTERVAL),
            max_concurrent_buckets: (max_concurrent_buckets > 0).then_some(max_concurrent_buckets),
            list_files_since: env_or("SYNC_LIST_FILES_SINCE", true),
            skip_buckets: env_set("SYNC_SKIP_BUCKETS"),
            skip_files: env_set("SYNC_SKIP_FILES"),
            skip_labels: env_set("SYNC_SKIP_LABELS"),

            ack_wait: Duration::from_secs(env_or("BROKER_ACK_WAIT_SECS", 30)),
            broker_connect: BackoffPolicy::new(
                env_or("BROKER_CONNECT_ATTEMPTS", 5),
                Duration::from_millis(env_or("BROKER_CONNECT_DELAY_MS", 500)),
                env_or("BROKER_CONNECT_MULTIPLIER", 2.0),
            )
            .with_max_delay(Duration::from_millis(env_or(
                "BROKER_CONNECT_MAX_DELAY_MS",
                30_000,
            ))),
            publish_retry: BackoffPolicy::new(
                env_or("PUBLISH_MAX_ATTEMPTS", 5),
                Duration::from_millis(env_or("PUBLISH_RETRY_DELAY_MS", 200)),
                env_or("PUBLISH_RETRY_MULTIPLIER", 2.0),
            )
            .with_max_delay(Duration::from_millis(env_or(
                "PUBLISH_RETRY_MAX_DELAY_MS",
                10_000,
            ))),

            checkpoint_db_path: std::env::var("CHECKPOINT_DB_PATH")
                .unwrap_or_else(|_| "sync-checkpoints.redb".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
            log_json: env_or("LOG_JSON", false),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(job_name: impl Into<String>, interval: Duration) -> Self {
        let mut config = Self::from_env();
        config.job_name = job_name.into();
        config.interval = interval.max(MIN_RECONCILE_INTERVAL);
        config
    }

    /// 对账器选项
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            skip_buckets: self.skip_buckets.clone(),
            skip_files: self.skip_files.clone(),
            skip_labels: self.skip_labels.clone(),
            max_concurrent_buckets: self.max_concurrent_buckets,
            list_files_since: self.list_files_since,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_set(key: &str) -> HashSet<String> {
    std::env::var(key)
        .map(|v| parse_list(&v))
        .unwrap_or_default()
}

/// Comma separated list, blanks dropped
fn parse_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
