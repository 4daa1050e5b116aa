//! Paced delivery of reply chunks to a channel.

use std::time::Duration;

use {
    courier_channels::{ChannelOutbound, ChannelReplyTarget},
    courier_config::DeliveryConfig,
    rand::Rng,
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, delivery as delivery_metrics, labels};

/// Randomized delay between consecutive chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    fn next_delay(self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }
}

impl From<&DeliveryConfig> for Pacing {
    fn from(cfg: &DeliveryConfig) -> Self {
        Self {
            min: Duration::from_millis(cfg.pacing_min_ms),
            max: Duration::from_millis(cfg.pacing_max_ms.max(cfg.pacing_min_ms)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: usize,
    pub total: usize,
    pub cancelled: bool,
    /// The send failure that stopped delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.sent == self.total
    }
}

/// Send `chunks` in order with a pause between them. Stops at the first
/// failed send or when `cancel` fires.
pub async fn deliver(
    outbound: &dyn ChannelOutbound,
    target: &ChannelReplyTarget,
    chunks: &[String],
    pacing: Pacing,
    cancel: &CancellationToken,
) -> DeliveryReport {
    let mut report = DeliveryReport {
        total: chunks.len(),
        ..Default::default()
    };

    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            let delay = pacing.next_delay();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {},
                () = tokio::time::sleep(delay) => {},
            }
        }
        if cancel.is_cancelled() {
            debug!(channel = %target.channel_id, sent = report.sent, "delivery cancelled");
            report.cancelled = true;
            break;
        }

        match outbound
            .send_text(&target.account_id, &target.chat_id, chunk)
            .await
        {
            Ok(()) => {
                report.sent += 1;
                #[cfg(feature = "metrics")]
                counter!(
                    delivery_metrics::CHUNKS_SENT_TOTAL,
                    labels::CHANNEL => target.channel_id.clone()
                )
                .increment(1);
            },
            Err(e) => {
                warn!(
                    channel = %target.channel_id,
                    chunk = i,
                    total = chunks.len(),
                    error = %e,
                    "chunk send failed; stopping delivery"
                );
                #[cfg(feature = "metrics")]
                counter!(
                    delivery_metrics::FAILURES_TOTAL,
                    labels::CHANNEL => target.channel_id.clone()
                )
                .increment(1);
                report.error = Some(e.to_string());
                break;
            },
        }
    }
    report
}
