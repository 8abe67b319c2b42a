//! Catalog descriptors exchanged with the storage API
//!
//! Every write or delete of a file produces a new immutable version; the
//! catalog lists one [`FileDescriptor`] per version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation a version records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Write,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDescriptor {
    pub name: String,
    pub created: DateTime<Utc>,
}

/// One immutable version of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// File ID within the bucket
    pub name: String,
    /// Version ID
    pub version: String,
    pub created: DateTime<Utc>,
    pub operation: Operation,
    pub checksum: String,
    pub content_type: String,
    pub archetype: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl FileDescriptor {
    /// Metadata portion of this descriptor
    pub fn metadata(&self) -> VersionMetadata {
        VersionMetadata {
            checksum: self.checksum.clone(),
            content_type: self.content_type.clone(),
            archetype: self.archetype.clone(),
            created: self.created,
            size: self.size,
            labels: self.labels.clone(),
        }
    }

    pub fn has_any_label<'a>(&self, mut labels: impl Iterator<Item = &'a String>) -> bool {
        labels.any(|l| self.labels.contains(l))
    }
}

/// Metadata stored alongside version content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub checksum: String,
    pub content_type: String,
    pub archetype: String,
    pub created: DateTime<Utc>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Content plus metadata of a single version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub content: Vec<u8>,
    pub metadata: VersionMetadata,
}

/// Result of uploading a version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// The same version with the same checksum was already stored
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_descriptor_serialization() {
        let desc = FileDescriptor {
            name: "report.pdf".to_string(),
            version: "v1".to_string(),
            created: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            operation: Operation::Delete,
            checksum: "abc".to_string(),
            content_type: "application/pdf".to_string(),
            archetype: "document".to_string(),
            size: 42,
            labels: vec![],
        };

        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["operation"], "delete");
        assert_eq!(json["contentType"], "application/pdf");
        assert!(json.get("labels").is_none());

        let back: FileDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_has_any_label() {
        let desc = FileDescriptor {
            name: "a".to_string(),
            version: "v1".to_string(),
            created: Utc::now(),
            operation: Operation::Write,
            checksum: String::new(),
            content_type: String::new(),
            archetype: String::new(),
            size: 0,
            labels: vec!["private".to_string()],
        };
        let skip = ["tmp".to_string(), "private".to_string()];
        assert!(desc.has_any_label(skip.iter()));
        assert!(!desc.has_any_label(skip[..1].iter()));
    }
}
