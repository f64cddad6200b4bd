//! The process-wide "processed" set backing queue-consumer idempotency
//! (§4.6 step 3). The atomic set-add is the idempotency primitive: a single
//! writer per key, TTL-expired entries pruned lazily on access.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct ProcessedSet {
    entries: Mutex<FxHashMap<String, Instant>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks whether `key` was already marked processed within
    /// `ttl`, and if not, marks it now. Returns `true` if this call is the
    /// one that marks it (first time seen), `false` if it was a duplicate.
    pub fn mark_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        if entries.contains_key(key) {
            false
        } else {
            entries.insert(key.to_string(), now);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_succeeds_second_is_duplicate() {
        let set = ProcessedSet::new();
        assert!(set.mark_if_absent("evt_1", Duration::from_secs(60)));
        assert!(!set.mark_if_absent("evt_1", Duration::from_secs(60)));
    }

    #[test]
    fn expired_entries_are_pruned_and_can_be_remarked() {
        let set = ProcessedSet::new();
        assert!(set.mark_if_absent("evt_1", Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(set.mark_if_absent("evt_1", Duration::from_millis(1)));
    }
}
