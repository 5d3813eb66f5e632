//! Wall-clock helpers.
//!
//! Timers run on `Instant`. Wall-clock milliseconds are only used for values
//! that leave the process: PING timestamps and status event times.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(epoch_millis() > 1_577_836_800_000);
    }

    #[test]
    fn epoch_millis_does_not_go_backwards_quickly() {
        let a = epoch_millis();
        let b = epoch_millis();
        assert!(b + 1_000 >= a);
    }
}
