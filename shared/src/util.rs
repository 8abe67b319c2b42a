use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp as RFC3339 with millisecond precision, always `Z`-suffixed.
pub fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
