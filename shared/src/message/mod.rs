//! 文件变更事件类型定义
//!
//! 这些类型在发布端（存储节点）和消费端（同步节点）之间共享，
//! 通过消息代理以 JSON 形式传输。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::catalog::Operation;

/// 文件变更事件类型
///
/// The subject string doubles as queue group and durable name on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// 新文件
    FileNew,
    /// 文件新版本
    FileUpdate,
    /// 文件删除
    FileDelete,
}

impl EventType {
    /// Every event kind, in subscription order.
    pub const ALL: [EventType; 3] = [EventType::FileNew, EventType::FileUpdate, EventType::FileDelete];

    /// Broker subject for this event kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FileNew => "file_new",
            EventType::FileUpdate => "file_update",
            EventType::FileDelete => "file_delete",
        }
    }

    /// Catalog operation applied when this event is consumed
    pub fn operation(&self) -> Operation {
        match self {
            EventType::FileNew | EventType::FileUpdate => Operation::Write,
            EventType::FileDelete => Operation::Delete,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown subject string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_new" => Ok(EventType::FileNew),
            "file_update" => Ok(EventType::FileUpdate),
            "file_delete" => Ok(EventType::FileDelete),
            other => Err(ParseEventTypeError(other.to_string())),
        }
    }
}

/// 事件负载 - 只标识版本，不携带时间戳或内容
///
/// Consumers look the version up on the source instead of trusting a
/// snapshot taken at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(rename = "bucketID")]
    pub bucket_id: String,
    #[serde(rename = "fileID")]
    pub file_id: String,
    pub version: String,
}

impl FileInfo {
    pub fn new(
        bucket_id: impl Into<String>,
        file_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            file_id: file_id.into(),
            version: version.into(),
        }
    }

    /// 序列化为二进制
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 从二进制解析
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.bucket_id, self.file_id, self.version)
    }
}
