//! Shared utilities.

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp in milliseconds since UNIX epoch, used for log context and
/// subprocess timing.
#[inline]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a simple unique id based on current time in nanoseconds.
/// Sufficient for tagging short-lived temp files.
#[inline]
pub fn gen_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}", nanos)
}
