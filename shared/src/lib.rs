//! Shared types for the storage sync engine
//!
//! Types that cross a process boundary: the event payload published on the
//! broker, and the catalog descriptors exchanged with the storage API.

pub mod catalog;
pub mod message;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Message re-exports (for convenient access)
pub use message::{EventType, FileInfo, ParseEventTypeError};

// Catalog re-exports
pub use catalog::{
    BucketDescriptor, FileDescriptor, FileVersion, Operation, PutOutcome, VersionMetadata,
};
