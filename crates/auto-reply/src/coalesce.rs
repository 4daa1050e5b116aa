//! Streamed-text coalescer.
//!
//! Assistant text arrives as small deltas. The coalescer accumulates them and
//! emits channel-sized blocks: immediately once the buffer reaches
//! `max_chars`, otherwise after `idle` of silence. A block boundary never
//! falls inside a fenced code block.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    courier_common::{Timers, types::BlockCallback},
    courier_config::StreamingConfig,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, delivery as delivery_metrics};

use crate::fence::{enclosing_span, fence_spans, has_open_fence, splits_fence};

/// How many flushed blocks are remembered for duplicate suppression.
const RECENT_BLOCKS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub idle: Duration,
}

impl From<&StreamingConfig> for CoalescerConfig {
    fn from(cfg: &StreamingConfig) -> Self {
        Self {
            min_chars: cfg.min_chars,
            max_chars: cfg.max_chars,
            idle: Duration::from_millis(cfg.idle_ms),
        }
    }
}

#[derive(Default)]
struct State {
    buf: String,
    recent: VecDeque<String>,
    finished: bool,
}

impl State {
    /// Record `block` as flushed. Returns `false` for a recent duplicate.
    fn remember(&mut self, block: &str) -> bool {
        if block.is_empty() || self.recent.iter().any(|b| b == block) {
            return false;
        }
        if self.recent.len() == RECENT_BLOCKS {
            self.recent.pop_front();
        }
        self.recent.push_back(block.to_string());
        true
    }
}

struct Inner {
    state: Mutex<State>,
    min_chars: usize,
    max_chars: usize,
    sink: BlockCallback,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, blocks: Vec<String>) {
        for block in blocks {
            #[cfg(feature = "metrics")]
            counter!(delivery_metrics::BLOCKS_EMITTED_TOTAL).increment(1);
            (self.sink)(block);
        }
    }

    /// Idle flush: everything buffered, unless that would leave a fence open.
    fn flush_idle(&self) {
        let block = {
            let mut state = self.lock();
            if state.finished || has_open_fence(&state.buf) {
                None
            } else {
                let block = std::mem::take(&mut state.buf).trim().to_string();
                state.remember(&block).then_some(block)
            }
        };
        if let Some(block) = block {
            debug!(chars = block.chars().count(), "idle flush");
            self.emit(vec![block]);
        }
    }
}

/// Accumulates streamed fragments into blocks for a [`BlockCallback`].
pub struct Coalescer {
    inner: Arc<Inner>,
    idle: Duration,
    timer: Timers<()>,
}

impl Coalescer {
    pub fn new(config: CoalescerConfig, sink: BlockCallback) -> Self {
        let max_chars = config.max_chars.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                min_chars: config.min_chars.min(max_chars),
                max_chars,
                sink,
            }),
            idle: config.idle,
            timer: Timers::new(),
        }
    }

    /// Append a fragment. Full blocks are emitted before this returns; a
    /// partial remainder re-arms the idle timer.
    pub fn push(&self, fragment: &str) {
        let (blocks, pending) = {
            let mut state = self.inner.lock();
            if state.finished {
                return;
            }
            state.buf.push_str(fragment);
            let mut blocks = Vec::new();
            while let Some(block) = take_block(&mut state.buf, self.inner.min_chars, self.inner.max_chars) {
                if state.remember(&block) {
                    blocks.push(block);
                }
            }
            (blocks, !state.buf.trim().is_empty())
        };
        self.inner.emit(blocks);

        if pending {
            let inner = Arc::clone(&self.inner);
            self.timer.schedule((), self.idle, async move {
                inner.flush_idle();
            });
        } else {
            self.timer.cancel(&());
        }
    }

    /// Flush whatever is left and stop accepting fragments.
    pub fn finish(&self) {
        self.timer.cancel(&());
        let block = {
            let mut state = self.inner.lock();
            state.finished = true;
            let block = std::mem::take(&mut state.buf).trim().to_string();
            state.remember(&block).then_some(block)
        };
        if let Some(block) = block {
            self.inner.emit(vec![block]);
        }
    }

    #[must_use]
    pub fn pending_chars(&self) -> usize {
        self.inner.lock().buf.chars().count()
    }
}

fn byte_at_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Cut one block off the front of `buf` once it holds at least `max` chars.
fn take_block(buf: &mut String, min: usize, max: usize) -> Option<String> {
    if buf.chars().count() < max {
        return None;
    }
    let window_end = byte_at_char(buf, max);
    let min_end = byte_at_char(buf, min);
    let spans = fence_spans(buf);

    let cut = match enclosing_span(&spans, window_end) {
        // Extend through the closing fence.
        Some(span) if !has_open_fence(&buf[..span.end]) => span.end,
        // Fence still streaming: emit the prose before it, or wait.
        Some(span) if span.start > 0 && span.start >= min_end => span.start,
        Some(_) => return None,
        None => {
            let window = &buf[..window_end];
            let ok = |pos: usize| pos > 0 && pos >= min_end && !splits_fence(&spans, pos);
            window
                .rmatch_indices("\n\n")
                .map(|(i, _)| i + 1)
                .find(|&i| ok(i))
                .or_else(|| {
                    window
                        .rmatch_indices('\n')
                        .map(|(i, _)| i + 1)
                        .find(|&i| ok(i))
                })
                .unwrap_or(window_end)
        },
    };

    let block = buf[..cut].trim_end().to_string();
    *buf = buf[cut..].trim_start_matches('\n').to_string();
    Some(block)
}
