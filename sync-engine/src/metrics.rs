//! Sync metrics
//!
//! Duration histograms recorded through the `metrics` facade. Nothing is
//! exported from here; the embedding process installs a recorder/exporter.

use std::fmt;
use std::time::Duration;

use shared::{EventType, Operation};

pub const HANDLER_DURATION: &str = "sync_handler_duration_seconds";
pub const RECONCILE_DURATION: &str = "sync_reconcile_duration_seconds";
pub const CONSUMER_DURATION: &str = "sync_consumer_duration_seconds";

/// Outcome of applying one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    /// Destination changed
    Synced,
    /// Destination already matched, or the source is gone
    SyncNotNeeded,
    Error,
}

impl SyncResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncResult::Synced => "synced",
            SyncResult::SyncNotNeeded => "sync_not_needed",
            SyncResult::Error => "error",
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Register descriptions with whatever recorder is installed
pub fn describe_metrics() {
    metrics::describe_histogram!(
        HANDLER_DURATION,
        metrics::Unit::Seconds,
        "Time spent applying one file version, by operation and result"
    );
    metrics::describe_histogram!(
        RECONCILE_DURATION,
        metrics::Unit::Seconds,
        "Batch reconciliation duration per bucket, file and run"
    );
    metrics::describe_histogram!(
        CONSUMER_DURATION,
        metrics::Unit::Seconds,
        "Time spent handling one broker message, by event and ack"
    );
}

pub fn observe_handler(operation: Operation, result: SyncResult, elapsed: Duration) {
    metrics::histogram!(
        HANDLER_DURATION,
        "operation" => operation.as_str(),
        "result" => result.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// `scope` is one of `bucket`, `file`, `run`
pub fn observe_reconcile(scope: &'static str, success: bool, elapsed: Duration) {
    metrics::histogram!(
        RECONCILE_DURATION,
        "operation" => scope,
        "success" => if success { "true" } else { "false" }
    )
    .record(elapsed.as_secs_f64());
}

pub fn observe_consumer(event: EventType, acked: bool, elapsed: Duration) {
    metrics::histogram!(
        CONSUMER_DURATION,
        "event" => event.as_str(),
        "ack" => if acked { "true" } else { "false" }
    )
    .record(elapsed.as_secs_f64());
}
