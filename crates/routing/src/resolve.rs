use {
    courier_common::types::{ChatType, InboundEvent, RoutePeer, SourceKind},
    courier_config::{AgentBinding, CourierConfig, IsolationMode},
    courier_sessions::SessionKey,
    serde::Serialize,
    tracing::debug,
};

use crate::{Error, Result};

/// Which level of the cascade selected the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedBy {
    /// Explicitly requested by the caller (CLI `--agent`).
    Explicit,
    Peer,
    Account,
    Channel,
    Default,
}

/// Resolved route: which agent handles this message and the session key.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub agent_id: String,
    pub session_key: SessionKey,
    pub matched_by: MatchedBy,
}

fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Walk the binding cascade for `peer`. Within one level the first binding
/// in configuration order wins.
#[must_use]
pub fn resolve_agent(bindings: &[AgentBinding], default_agent: &str, peer: &RoutePeer) -> (String, MatchedBy) {
    let on_channel = || bindings.iter().filter(|b| same(&b.channel, &peer.channel_id));

    let peer_match = on_channel().find(|b| {
        b.peer_id.as_deref() == Some(peer.peer_id.as_str())
            && b.account_id
                .as_deref()
                .is_none_or(|acct| same(acct, &peer.account_id))
    });
    if let Some(b) = peer_match {
        return (b.agent_id.clone(), MatchedBy::Peer);
    }

    let account_match = on_channel().find(|b| {
        b.peer_id.is_none()
            && b.account_id
                .as_deref()
                .is_some_and(|acct| same(acct, &peer.account_id))
    });
    if let Some(b) = account_match {
        return (b.agent_id.clone(), MatchedBy::Account);
    }

    if let Some(b) = on_channel().find(|b| b.peer_id.is_none() && b.account_id.is_none()) {
        return (b.agent_id.clone(), MatchedBy::Channel);
    }

    (default_agent.to_string(), MatchedBy::Default)
}

/// Session key for a channel conversation under `isolation`.
///
/// Per-thread isolation only applies to group messages that carry a thread
/// id; everything else falls back to one session per peer.
#[must_use]
pub fn derive_session_key(agent_id: &str, peer: &RoutePeer, isolation: IsolationMode) -> SessionKey {
    match (isolation, peer.chat_type, peer.thread_id.as_deref()) {
        (IsolationMode::Shared, ..) => {
            SessionKey::shared(agent_id, &peer.channel_id, &peer.account_id)
        },
        (IsolationMode::PerThread, ChatType::Group, Some(thread)) if !thread.trim().is_empty() => {
            SessionKey::thread(agent_id, &peer.channel_id, &peer.account_id, thread)
        },
        _ => SessionKey::peer(agent_id, &peer.channel_id, &peer.account_id, &peer.peer_id),
    }
}

/// Resolve agent and session key for an inbound event.
///
/// Gateway callers may name their own session key; CLI and gateway events
/// without channel identifiers share the agent's main session.
pub fn resolve_route(event: &InboundEvent, config: &CourierConfig) -> Result<ResolvedRoute> {
    let peer = event.peer();

    let (agent_id, matched_by) = match event.agent_id.as_deref().map(str::trim) {
        Some(explicit) if !explicit.is_empty() => (explicit.to_string(), MatchedBy::Explicit),
        _ if event.source == SourceKind::Channel => {
            if event.channel_id.as_deref().is_none_or(|c| c.trim().is_empty()) {
                return Err(Error::MissingChannel);
            }
            resolve_agent(&config.bindings, &config.agents.defaults.id, &peer)
        },
        _ => (config.agents.defaults.id.clone(), MatchedBy::Default),
    };
    if agent_id.trim().is_empty() {
        return Err(Error::NoAgent {
            channel: peer.channel_id,
        });
    }

    let session_key = match (&event.session_key, event.source) {
        (Some(explicit), _) if !explicit.trim().is_empty() => SessionKey::new(explicit.trim()),
        (_, SourceKind::Channel) => derive_session_key(&agent_id, &peer, config.session.isolation),
        _ => SessionKey::main(&agent_id),
    };

    debug!(
        agent_id = %agent_id,
        session_key = %session_key,
        ?matched_by,
        channel = %peer.channel_id,
        "route resolved"
    );
    Ok(ResolvedRoute {
        agent_id,
        session_key,
        matched_by,
    })
}
