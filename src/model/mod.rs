pub mod archive;
pub mod event;
pub mod flow_node;
pub mod process;
pub mod token;

use std::time::{SystemTime, UNIX_EPOCH};

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Current time, never earlier than `previous`. Keeps per-row dates monotonic across clock skew.
pub fn stamp_after(previous: Timestamp) -> Timestamp {
    now_ms().max(previous)
}
