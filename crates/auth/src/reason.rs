use serde::{Deserialize, Serialize};

/// Why a model call failed. Derived once per error; drives both the runner's
/// recovery branch and the credential backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Key rejected or lacking permission.
    Auth,
    RateLimit,
    /// Quota or credit exhausted.
    Billing,
    Timeout,
    /// The request itself is malformed; retrying cannot help.
    Format,
    Unknown,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Billing => "billing",
            Self::Timeout => "timeout",
            Self::Format => "format",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
