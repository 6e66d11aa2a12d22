//! Utility functions for common operations

use crate::types::{Dimensions, Timestamp};

/// Build a dimension map from string pairs
pub fn dimensions(pairs: &[(&str, &str)]) -> Dimensions {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Start of the period that contains `now`
pub fn period_floor(now: Timestamp, period_seconds: u64) -> Timestamp {
    if period_seconds == 0 {
        return now;
    }
    now - now % period_seconds
}

/// Get current Unix timestamp
pub fn current_timestamp() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
