//! Shared timestamp/event helpers.

use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Milliseconds since the unix epoch.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Milliseconds since the unix epoch for an arbitrary `SystemTime` (file mtimes).
pub fn system_time_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}
