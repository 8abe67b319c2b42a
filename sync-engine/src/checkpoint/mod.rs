//! 对账检查点
//!
//! 每个同步任务保存一个 RFC3339 时间戳：下一次对账只处理晚于该时间创建的版本。
//! 只有整轮对账全部成功后，时间戳才会向前推进。

use chrono::{DateTime, Utc};

use crate::core::{Result, SyncError};

pub mod storage;

pub use storage::{CheckpointError, CheckpointResult, RedbCheckpointStore};

/// Namespace under which sync jobs keep their checkpoints
pub const CHECKPOINT_NAMESPACE: &str = "sync_checkpoints";

/// Key-value store holding one value per `(namespace, key)`
pub trait CheckpointStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> CheckpointResult<Option<Vec<u8>>>;

    fn update(&self, namespace: &str, key: &str, value: &[u8]) -> CheckpointResult<()>;
}

pub fn encode_checkpoint(ts: &DateTime<Utc>) -> String {
    shared::util::to_rfc3339(ts)
}

pub fn decode_checkpoint(raw: &[u8]) -> Result<DateTime<Utc>> {
    let value = String::from_utf8_lossy(raw).trim().to_string();
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| SyncError::InvalidCheckpoint { value, source })
}

/// Last checkpoint of `job`, if one was ever written
pub fn load_checkpoint(store: &dyn CheckpointStore, job: &str) -> Result<Option<DateTime<Utc>>> {
    store
        .get(CHECKPOINT_NAMESPACE, job)?
        .map(|raw| decode_checkpoint(&raw))
        .transpose()
}

pub fn save_checkpoint(store: &dyn CheckpointStore, job: &str, ts: &DateTime<Utc>) -> Result<()> {
    store.update(CHECKPOINT_NAMESPACE, job, encode_checkpoint(ts).as_bytes())?;
    Ok(())
}
