//! Wall-clock timestamps

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used to stamp exported reports.
///
/// A clock set before 1970 yields 0 rather than failing the export.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
