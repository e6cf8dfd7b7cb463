//! Time-related functions.

use std::time::SystemTime;

/// Get the current Unix timestamp, in seconds.
///
/// A clock set before the Unix epoch yields `0` rather than an error.
pub fn get_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(get_unix_timestamp() > 1_577_836_800);
    }
}
