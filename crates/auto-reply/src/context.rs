//! Per-event message context, built once the event is past dedup/collect.

use {
    chrono::{DateTime, Utc},
    courier_channels::ChannelReplyTarget,
    courier_common::types::{BlockCallback, InboundEvent, RoutePeer, SourceKind},
    courier_config::CourierConfig,
    courier_routing::{ResolvedRoute, resolve_route},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, labels};

use crate::{Result, injection};

/// Everything the pipeline knows about one inbound message.
pub struct MsgContext {
    pub source: SourceKind,
    pub route: ResolvedRoute,
    pub peer: RoutePeer,
    pub message_id: Option<String>,
    pub sender_name: Option<String>,
    pub media_urls: Vec<String>,
    /// Body as received, trimmed.
    pub raw_body: String,
    /// Body the turn works on (wrapped when flagged).
    pub body: String,
    /// The body matched an injection pattern and was wrapped.
    pub injection_flagged: bool,
    pub cancel: CancellationToken,
    pub on_block: Option<BlockCallback>,
    pub received_at: DateTime<Utc>,
}

impl MsgContext {
    /// Resolve routing, trim the body and run the injection guard.
    ///
    /// CLI input comes from the operator and is never wrapped.
    pub fn finalize(event: InboundEvent, config: &CourierConfig, received_at: DateTime<Utc>) -> Result<Self> {
        let route = resolve_route(&event, config)?;
        let peer = event.peer();
        let raw_body = event.body.trim().to_string();

        let guarded = config.dispatch.injection_guard && event.source != SourceKind::Cli;
        let (body, injection_flagged) = if guarded {
            injection::guard(&raw_body)
        } else {
            (raw_body.clone(), false)
        };
        if injection_flagged {
            warn!(
                session_key = %route.session_key,
                channel = %peer.channel_id,
                "inbound message looks like prompt injection; wrapped as untrusted"
            );
            #[cfg(feature = "metrics")]
            counter!(
                dispatch_metrics::INJECTION_WRAPPED_TOTAL,
                labels::CHANNEL => peer.channel_id.clone()
            )
            .increment(1);
        }

        debug!(
            source = event.source.as_str(),
            session_key = %route.session_key,
            agent_id = %route.agent_id,
            media = event.media_urls.len(),
            "inbound finalized"
        );
        Ok(Self {
            source: event.source,
            route,
            peer,
            message_id: event.message_id,
            sender_name: event.sender_name,
            media_urls: event.media_urls,
            raw_body,
            body,
            injection_flagged,
            cancel: event.cancel.unwrap_or_default(),
            on_block: event.on_block,
            received_at,
        })
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        self.route.session_key.as_str()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.media_urls.is_empty()
    }

    /// Where channel replies go; `None` for CLI and gateway events.
    #[must_use]
    pub fn reply_target(&self) -> Option<ChannelReplyTarget> {
        (self.source == SourceKind::Channel).then(|| ChannelReplyTarget {
            channel_id: self.peer.channel_id.clone(),
            account_id: self.peer.account_id.clone(),
            chat_id: self.peer.peer_id.clone(),
            message_id: self.message_id.clone(),
        })
    }

    /// Sender label for the envelope.
    #[must_use]
    pub fn sender_label(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.peer.peer_id)
    }
}
