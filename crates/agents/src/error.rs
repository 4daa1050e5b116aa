use courier_auth::FailureReason;

/// Terminal outcome of a turn that did not produce a reply.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("turn cancelled")]
    Cancelled,

    /// The request is malformed; retrying cannot help.
    #[error("request rejected: {0}")]
    Format(String),

    /// Every model in the fallback chain rejected its credential.
    #[error("authentication failed for every model in the fallback chain: {0}")]
    Authentication(String),

    #[error("gave up after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },

    /// The model rejected reasoning even with reasoning off.
    #[error("model rejected the reasoning level: {0}")]
    ReasoningRejected(String),

    #[error("context overflow could not be recovered: {0}")]
    ContextOverflow(String),

    #[error("failed to create session for {model}: {source}")]
    SessionCreate {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no model configured")]
    NoModel,

    #[error("{reason}: {message}")]
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl RunError {
    /// Short machine-readable tag, used as the error type in dispatch results
    /// and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Format(_) => "format",
            Self::Authentication(_) => "authentication",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
            Self::ReasoningRejected(_) => "reasoning_rejected",
            Self::ContextOverflow(_) => "context_overflow",
            Self::SessionCreate { .. } => "session_create",
            Self::NoModel => "no_model",
            Self::Failed { .. } => "unknown",
        }
    }

    /// Human-facing headline for error rendering.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::Cancelled => "Stopped",
            Self::Format(_) => "Request rejected",
            Self::Authentication(_) => "Authentication failed",
            Self::ExhaustedRetries { .. } => "Model unavailable",
            Self::ReasoningRejected(_) => "Reasoning not supported",
            Self::ContextOverflow(_) => "Conversation too long",
            Self::SessionCreate { .. } | Self::NoModel => "Configuration error",
            Self::Failed { .. } => "Something went wrong",
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;
