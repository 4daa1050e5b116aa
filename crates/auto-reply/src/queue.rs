//! Collect mode: batch rapid messages from one sender into a single turn.
//!
//! Each arrival re-arms a debounce timer for its `(channel, account, peer)`
//! key. When the sender goes quiet the buffered bodies are joined in arrival
//! order and handed to the flush callback exactly once.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    courier_common::{
        Timers,
        types::{DEFAULT_ACCOUNT_ID, InboundEvent},
    },
    tracing::debug,
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, labels};

pub struct CollectQueue {
    debounce: Duration,
    pending: Mutex<HashMap<String, Vec<InboundEvent>>>,
    timers: Timers<String>,
}

impl CollectQueue {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: Mutex::new(HashMap::new()),
            timers: Timers::new(),
        }
    }

    /// Buffer key for a channel event.
    #[must_use]
    pub fn key(event: &InboundEvent) -> String {
        format!(
            "{}:{}:{}",
            event.channel_id.as_deref().unwrap_or_default(),
            event.account_id.as_deref().unwrap_or(DEFAULT_ACCOUNT_ID),
            event.peer_id.as_deref().unwrap_or_default(),
        )
    }

    /// Buffer `event` and re-arm the quiet-window timer. Returns how many
    /// events are now waiting under its key.
    pub fn push<F, Fut>(self: &Arc<Self>, event: InboundEvent, flush: F) -> usize
    where
        F: FnOnce(InboundEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = Self::key(&event);
        #[cfg(feature = "metrics")]
        counter!(
            dispatch_metrics::COLLECTED_TOTAL,
            labels::CHANNEL => event.channel_id.clone().unwrap_or_default()
        )
        .increment(1);

        let waiting = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let buf = pending.entry(key.clone()).or_default();
            buf.push(event);
            buf.len()
        };
        debug!(key = %key, waiting, "message collected");

        let queue = Arc::downgrade(self);
        let timer_key = key.clone();
        self.timers.schedule(key, self.debounce, async move {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            if let Some(combined) = queue.take(&timer_key) {
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::COLLECT_FLUSHES_TOTAL).increment(1);
                debug!(key = %timer_key, "collect window closed");
                flush(combined).await;
            }
        });
        waiting
    }

    /// Drain and combine everything buffered under `key`.
    fn take(&self, key: &str) -> Option<InboundEvent> {
        let events = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)?;
        combine(events)
    }

    #[must_use]
    pub fn waiting(&self, key: &str) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Drop every buffered event and disarm all timers.
    pub fn clear(&self) {
        self.timers.cancel_all();
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Merge buffered events into one: bodies newline-joined in arrival order,
/// media unioned, everything else taken from the newest event.
#[must_use]
pub fn combine(events: Vec<InboundEvent>) -> Option<InboundEvent> {
    let body = events
        .iter()
        .map(|e| e.body.trim())
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut media: Vec<String> = Vec::new();
    for url in events.iter().flat_map(|e| e.media_urls.iter()) {
        if !media.contains(url) {
            media.push(url.clone());
        }
    }

    let mut last = events.into_iter().last()?;
    last.body = body;
    last.media_urls = media;
    Some(last)
}
