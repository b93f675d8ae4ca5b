use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A short, collision-resistant identifier prefixed with `label`, e.g.
/// `short_id("room")` -> `"room-3f9a2c7b1e4d6a08"`.
///
/// Used for identifiers the host itself must mint (the default room, and
/// any future rooms an admin surface might create). Peers, files and
/// transfers bring their own ids over the wire and never go through here.
#[must_use]
pub fn short_id(label: &str) -> String {
    let suffix: u64 = rand::rng().random();
    format!("{label}-{suffix:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_are_distinct() {
        let a = short_id("room");
        let b = short_id("room");
        assert_ne!(a, b);
        assert!(a.starts_with("room-"));
    }

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
