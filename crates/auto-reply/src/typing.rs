//! Typing indicator kept alive while a turn runs.
//!
//! Platforms expire "typing" after a few seconds, so it is refreshed on an
//! interval. The loop ends when the guard is sealed (or dropped) and in any
//! case after a hard TTL, so a stuck turn cannot leave it running forever.

use std::{sync::Arc, time::Duration};

use {
    courier_channels::ChannelOutbound,
    tokio::{sync::oneshot, task::JoinHandle},
    tracing::debug,
};

/// Stops the typing loop when sealed or dropped.
pub struct TypingGuard {
    done: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TypingGuard {
    /// Start refreshing the typing indicator for `to` on `account_id`.
    pub fn start(
        outbound: Arc<dyn ChannelOutbound>,
        account_id: String,
        to: String,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let expires = tokio::time::Instant::now() + ttl;
            loop {
                if let Err(e) = outbound.send_typing(&account_id, &to).await {
                    debug!(error = %e, "typing indicator failed");
                }
                tokio::select! {
                    biased;
                    _ = &mut done_rx => break,
                    _ = tokio::time::sleep_until(expires) => {
                        debug!(to = %to, "typing indicator reached its ttl");
                        break;
                    },
                    _ = tokio::time::sleep(interval) => {},
                }
            }
        });
        Self {
            done: Some(done_tx),
            task,
        }
    }

    /// Stop the loop now.
    pub fn seal(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, courier_channels::MemoryOutbound};

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn elapse_secs(secs: u64) {
        for _ in 0..secs {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_until_sealed() {
        let outbound = Arc::new(MemoryOutbound::new());
        let guard = TypingGuard::start(
            Arc::clone(&outbound) as Arc<dyn ChannelOutbound>,
            "default".into(),
            "chat".into(),
            Duration::from_secs(6),
            Duration::from_secs(120),
        );
        settle().await;
        assert_eq!(outbound.typing_count(), 1);

        elapse_secs(13).await;
        assert_eq!(outbound.typing_count(), 3);

        guard.seal();
        elapse_secs(30).await;
        assert_eq!(outbound.typing_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_bounds_the_loop() {
        let outbound = Arc::new(MemoryOutbound::new());
        let guard = TypingGuard::start(
            Arc::clone(&outbound) as Arc<dyn ChannelOutbound>,
            "default".into(),
            "chat".into(),
            Duration::from_secs(6),
            Duration::from_secs(20),
        );
        elapse_secs(60).await;
        assert!(guard.is_finished());
        // Sends at 0, 6, 12 and 18 seconds.
        assert_eq!(outbound.typing_count(), 4);
    }
}
