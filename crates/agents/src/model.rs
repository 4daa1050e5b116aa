//! The agent session contract.
//!
//! An [`AgentSession`] is an opaque conversational context: it owns the
//! transcript, calls the model, and runs tools. The runner and dispatcher only
//! ever talk to it through `prompt`, `subscribe`, `compact` and `dispose`.

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

use crate::{model_ref::ModelRef, think::ThinkLevel};

/// Token accounting for one prompt (or accumulated over many).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Tool execution approval policy for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Run tools without asking.
    Auto,
    /// Ask before each tool call.
    Interactive,
    /// Refuse every tool call.
    Deny,
}

impl ExecMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Interactive => "interactive",
            Self::Deny => "deny",
        }
    }
}

impl std::str::FromStr for ExecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "interactive" | "ask" => Ok(Self::Interactive),
            "deny" | "off" => Ok(Self::Deny),
            other => Err(format!("unknown exec mode: {other}")),
        }
    }
}

/// Per-prompt knobs. Passed on every prompt so a retry can change them
/// without recreating the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOptions {
    pub think: ThinkLevel,
    pub exec: Option<ExecMode>,
}

/// The final answer of a completed prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptOutcome {
    pub text: String,
    pub usage: Usage,
}

/// Result of a compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub messages_before: usize,
    pub messages_after: usize,
}

/// Events a session emits while a prompt runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Incremental assistant text.
    TextDelta(String),
    ToolStart { name: String },
    ToolEnd { name: String, success: bool },
    TurnEnd { usage: Usage },
}

pub type SessionListener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Unsubscribes its listener when called or dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that was never attached to anything.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Listener registry that session implementations embed.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<Vec<(u64, SessionListener)>>>,
    next_id: Arc<AtomicU64>,
}

impl Listeners {
    pub fn add(&self, listener: SessionListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(other, _)| *other != id);
        })
    }

    /// Deliver `event` to every listener. Listeners run outside the lock so
    /// they may unsubscribe themselves.
    pub fn emit(&self, event: &SessionEvent) {
        let listeners: Vec<SessionListener> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live conversational context backed by some model.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Run one prompt to completion (including any tool loop).
    async fn prompt(&self, text: &str, opts: &TurnOptions) -> anyhow::Result<PromptOutcome>;

    fn subscribe(&self, listener: SessionListener) -> Subscription;

    /// Summarize older turns to free context.
    async fn compact(&self, instructions: Option<&str>) -> anyhow::Result<CompactionStats>;

    /// Shrink oversized tool results in the transcript to `max_chars`.
    /// Returns how many results were changed.
    fn truncate_tool_results(&self, _max_chars: usize) -> usize {
        0
    }

    async fn dispose(&self);
}

/// What a session is created for.
#[derive(Clone)]
pub struct SessionSpec {
    pub session_key: String,
    pub agent_id: String,
    pub model: ModelRef,
    pub credential: Option<Secret<String>>,
}

impl fmt::Debug for SessionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSpec")
            .field("session_key", &self.session_key)
            .field("agent_id", &self.agent_id)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, spec: &SessionSpec) -> anyhow::Result<Arc<dyn AgentSession>>;
}
