//! Dispatch results and terminal error rendering.

use {courier_agents::Usage, serde::Serialize};

use crate::{delivery::DeliveryReport, error::Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// A turn ran and produced a reply.
    Replied,
    /// A slash command was handled instead of a turn.
    Command,
    /// Dropped as a redelivery of a message already seen.
    Duplicate,
    /// Buffered for a collect-mode batch; the batch replies on its own.
    Queued,
    Cancelled,
    /// Nothing to do: empty body and no media.
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchError {
    /// Machine-readable tag, e.g. `exhausted_retries`.
    pub kind: String,
    pub message: String,
}

/// What happened to one inbound event.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryReport>,
}

impl DispatchResult {
    #[must_use]
    pub fn status(status: DispatchStatus) -> Self {
        Self {
            status,
            reply: None,
            session_key: None,
            error: None,
            model: None,
            usage: None,
            delivery: None,
        }
    }

    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// True when the event produced no reply at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reply.is_none() && self.error.is_none()
    }
}

/// One plain-text message describing a terminal error.
#[must_use]
pub fn render_error(err: &Error) -> String {
    format!("\u{26a0}\u{fe0f} {}: {err}", err.title())
}

/// Cut `text` to at most `max_chars`, marking the cut.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('\u{2026}');
    out
}
