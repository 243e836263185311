//! ID utilities: monotonic sequence ids and trace ids.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new monotonic identifier (starts at 1). Used for audit `seq` and
/// any other run-scoped monotonic counter.
pub fn next_monotonic_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque trace identifier (UUID v4 string).
pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_increments() {
        let a = next_monotonic_id();
        let b = next_monotonic_id();
        assert!(b > a);
    }

    #[test]
    fn trace_id_format() {
        let t = new_trace_id();
        assert_eq!(t.len(), 36);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }
}
