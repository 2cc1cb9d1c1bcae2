//! Process-wide correlation ID
//!
//! The gateway tags every log record emitted while a request is in flight
//! with that request's correlation ID. The slot is process-wide and mutable;
//! callers handling concurrent requests set it on entry and clear it on exit.

use std::sync::RwLock;

use uuid::Uuid;

static CURRENT: RwLock<Option<String>> = RwLock::new(None);

/// Generate a fresh correlation ID (`req_<uuid>`).
pub fn new_correlation_id() -> String {
    format!("req_{}", Uuid::new_v4().as_simple())
}

/// Set the current correlation ID.
pub fn set_correlation_id(id: impl Into<String>) {
    let mut slot = CURRENT.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(id.into());
}

/// Read the current correlation ID, if one is set.
pub fn current_correlation_id() -> Option<String> {
    CURRENT
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Clear the current correlation ID.
pub fn clear_correlation_id() {
    let mut slot = CURRENT.write().unwrap_or_else(|e| e.into_inner());
    *slot = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test because the slot is process-wide shared state and the
    // test harness runs tests concurrently.
    #[test]
    fn slot_lifecycle() {
        set_correlation_id("req_test123");
        assert_eq!(current_correlation_id().as_deref(), Some("req_test123"));

        set_correlation_id("req_second");
        assert_eq!(current_correlation_id().as_deref(), Some("req_second"));

        clear_correlation_id();
        assert_eq!(current_correlation_id(), None);
    }

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("req_"));
        assert_eq!(a.len(), 4 + 32);
    }
}
