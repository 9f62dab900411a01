// =============================================================================
// Wall-clock timestamps
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX timestamp in milliseconds.
pub fn time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as i64
}

/// Current UNIX timestamp in seconds.
pub fn time_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs() as i64
}
