//! Keyed one-shot timers on the tokio clock.
//!
//! Each key holds at most one armed callback. Re-arming a key aborts the
//! previous callback, and a per-arm generation number guarantees that a timer
//! which already woke up but lost the race against a re-arm never fires.
//! Tests drive these timers with `tokio::time::pause()` / `advance()`.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{task::AbortHandle, time::Instant};

struct Slot {
    generation: u64,
    deadline: Instant,
    handle: AbortHandle,
}

/// A set of keyed, cancellable, re-armable one-shot timers.
pub struct Timers<K> {
    slots: Arc<Mutex<HashMap<K, Slot>>>,
    generation: AtomicU64,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K> Timers<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer for `key`; `callback` runs once after `delay`
    /// unless the key is cancelled or re-armed first.
    pub fn schedule<F>(&self, key: K, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;

        // The slot lock is held across spawn + insert so the new task cannot
        // observe the map before its own slot is present.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slots.remove(&key) {
            previous.handle.abort();
        }

        let shared = Arc::clone(&self.slots);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let claimed = {
                let mut slots = shared.lock().unwrap_or_else(|e| e.into_inner());
                match slots.get(&task_key) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&task_key);
                        true
                    },
                    _ => false,
                }
            };
            if claimed {
                callback.await;
            }
        });

        slots.insert(key, Slot {
            generation,
            deadline,
            handle: task.abort_handle(),
        });
    }

    /// Disarm the timer for `key`. Returns `true` if one was armed.
    pub fn cancel(&self, key: &K) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.remove(key) {
            Some(slot) => {
                slot.handle.abort();
                true
            },
            None => false,
        }
    }

    #[must_use]
    pub fn is_armed(&self, key: &K) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// When the timer for `key` is due, if armed.
    #[must_use]
    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|slot| slot.deadline)
    }

    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Disarm every timer.
    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for (_, slot) in slots.drain() {
            slot.handle.abort();
        }
    }
}

impl<K> Drop for Timers<K> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for (_, slot) in slots.drain() {
            slot.handle.abort();
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::atomic::AtomicUsize};

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let timers = Timers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        timers.schedule("k", Duration::from_millis(100), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_resets_the_deadline() {
        let timers = Timers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let h = Arc::clone(&hits);
            timers.schedule("k", Duration::from_millis(100), async move {
                h.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(60)).await;
            settle().await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timers = Timers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        timers.schedule(1u32, Duration::from_millis(10), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.deadline(&1).is_some());
        assert!(timers.cancel(&1));
        assert!(!timers.cancel(&1));

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let timers = Timers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for key in ["a", "b"] {
            let h = Arc::clone(&hits);
            timers.schedule(key, Duration::from_millis(10), async move {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.armed_count(), 2);
        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
