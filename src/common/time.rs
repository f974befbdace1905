//! Wall-clock helpers
//!
//! All timestamps in slakv are signed 64-bit milliseconds since the
//! Unix epoch. The sentinel -1 means "not applicable".

use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel timestamp for fields that carry no meaning in context.
pub const TS_NOT_APPLICABLE: i64 = -1;

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_advances() {
        let a = now_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_millis();
        assert!(b > a);
    }
}
