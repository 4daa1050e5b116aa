//! Inbound message deduplication.
//!
//! Channels redeliver on reconnect and webhooks retry on timeout, so the same
//! `(channel, message_id)` can arrive more than once. The first arrival wins
//! for the whole window.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    courier_common::{Clock, SystemClock},
    dashmap::{DashMap, mapref::entry::Entry},
};

/// Expired entries are swept every this many checks.
const SWEEP_EVERY: u64 = 64;

/// TTL-bounded set of seen message keys.
pub struct DedupCache {
    seen: DashMap<String, i64>,
    window_ms: i64,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    checks: AtomicU64,
}

impl DedupCache {
    pub fn new(window: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: DashMap::new(),
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            max_entries: max_entries.max(1),
            clock,
            checks: AtomicU64::new(0),
        }
    }

    /// Key for an inbound message; `None` when the source gives no message id.
    #[must_use]
    pub fn key(channel_id: &str, message_id: Option<&str>) -> Option<String> {
        let id = message_id.map(str::trim).filter(|id| !id.is_empty())?;
        Some(format!("{channel_id}:{id}"))
    }

    /// Returns true if `key` was already seen within the window.
    pub fn check_and_insert(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0 {
            self.sweep(now);
        }

        let duplicate = match self.seen.entry(key.to_string()) {
            Entry::Occupied(mut seen) => {
                if now - *seen.get() < self.window_ms {
                    true
                } else {
                    seen.insert(now);
                    false
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(now);
                false
            },
        };

        if !duplicate && self.seen.len() > self.max_entries {
            self.evict_oldest();
        }
        duplicate
    }

    fn sweep(&self, now: i64) {
        let window = self.window_ms;
        self.seen.retain(|_, at| now - *at < window);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .seen
            .iter()
            .min_by_key(|e| *e.value())
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.seen.remove(&key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(20 * 60), 5_000, Arc::new(SystemClock))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, courier_common::ManualClock};

    fn cache(max: usize) -> (DedupCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = DedupCache::new(Duration::from_secs(60), max, Arc::clone(&clock) as Arc<dyn Clock>);
        (cache, clock)
    }

    #[test]
    fn second_arrival_is_duplicate() {
        let (cache, _) = cache(100);
        assert!(!cache.check_and_insert("telegram:1"));
        assert!(cache.check_and_insert("telegram:1"));
        assert!(!cache.check_and_insert("telegram:2"));
    }

    #[test]
    fn window_expires() {
        let (cache, clock) = cache(100);
        assert!(!cache.check_and_insert("c1:m1"));
        clock.advance(Duration::from_secs(59));
        assert!(cache.check_and_insert("c1:m1"));
        clock.advance(Duration::from_secs(2));
        assert!(!cache.check_and_insert("c1:m1"));
    }

    #[test]
    fn bounded_by_evicting_oldest() {
        let (cache, clock) = cache(3);
        for i in 0..5 {
            clock.advance(Duration::from_millis(10));
            cache.check_and_insert(&format!("k{i}"));
        }
        assert_eq!(cache.len(), 3);
        // k0 and k1 were evicted, so they count as new again.
        assert!(!cache.check_and_insert("k0"));
        assert!(cache.check_and_insert("k4"));
    }

    #[test]
    fn key_requires_message_id() {
        assert_eq!(DedupCache::key("c1", Some("m1")).as_deref(), Some("c1:m1"));
        assert_eq!(DedupCache::key("c1", Some("  ")), None);
        assert_eq!(DedupCache::key("c1", None), None);
    }
}
