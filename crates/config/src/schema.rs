/// Config schema types (agents, bindings, session, dispatch, runner, delivery,
/// streaming, providers, credentials, metrics).
use std::{collections::HashMap, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub agents: AgentsConfig,
    /// Channel → agent bindings, most specific match wins.
    pub bindings: Vec<AgentBinding>,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub runner: RunnerConfig,
    pub delivery: DeliveryConfig,
    pub streaming: StreamingConfig,
    pub providers: HashMap<String, ProviderEntry>,
    pub credentials: CredentialsConfig,
    pub metrics: MetricsConfig,
}

impl CourierConfig {
    /// Look up an agent entry by id.
    #[must_use]
    pub fn agent(&self, id: &str) -> Option<&AgentEntry> {
        self.agents.list.iter().find(|a| a.id == id)
    }

    /// Effective model selection for an agent (entry override, else defaults).
    #[must_use]
    pub fn model_for(&self, agent_id: &str) -> &ModelConfig {
        self.agent(agent_id)
            .and_then(|a| a.model.as_ref())
            .unwrap_or(&self.agents.defaults.model)
    }

    /// Effective default reasoning level for an agent.
    #[must_use]
    pub fn thinking_for(&self, agent_id: &str) -> Option<&str> {
        self.agent(agent_id)
            .and_then(|a| a.thinking.as_deref())
            .or(self.agents.defaults.thinking.as_deref())
    }
}

// ── Agents ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
    pub list: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Agent that handles messages no binding matches.
    pub id: String,
    pub model: ModelConfig,
    /// Short names for models, e.g. `fast = "openai/gpt-4o-mini"`.
    pub aliases: HashMap<String, String>,
    /// Default reasoning effort (off, low, medium, high).
    pub thinking: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            id: "main".into(),
            model: ModelConfig::default(),
            aliases: HashMap::new(),
            thinking: None,
        }
    }
}

/// Primary model plus ordered fallbacks, each an alias or `provider/model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary: "openai/gpt-4o-mini".into(),
            fallbacks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEntry {
    pub id: String,
    pub model: Option<ModelConfig>,
    pub thinking: Option<String>,
}

/// Route messages from a channel (optionally narrowed to an account and/or
/// peer) to an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentBinding {
    pub agent_id: String,
    pub channel: String,
    pub account_id: Option<String>,
    pub peer_id: Option<String>,
}

// ── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub isolation: IsolationMode,
    pub reset: ResetConfig,
}

/// Granularity of channel session keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// One session per peer (chat / group).
    #[default]
    PerPeer,
    /// One session per thread inside groups; falls back to per-peer.
    PerThread,
    /// All peers of a channel account share one session.
    Shared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    pub mode: ResetMode,
    /// Local hour (0-23) at which `daily` sessions expire.
    pub at_hour: u8,
    /// Idle threshold for `idle` mode.
    pub idle_minutes: u64,
    /// IANA timezone for `daily` mode (defaults to UTC).
    pub timezone: Option<String>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            mode: ResetMode::Daily,
            at_hour: 4,
            idle_minutes: 60,
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Manual,
    #[default]
    Daily,
    Idle,
}

// ── Dispatch ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a `(channel, message id)` pair is remembered.
    pub dedup_window_secs: u64,
    /// Upper bound on remembered message ids.
    pub dedup_max_entries: usize,
    pub queue_mode: MessageQueueMode,
    /// Quiet period before collected channel messages are flushed.
    pub collect_debounce_ms: u64,
    /// Wrap bodies that look like prompt injection in an untrusted marker.
    pub injection_guard: bool,
    /// Emoji reaction sent to the inbound message when a channel turn starts.
    pub ack_reaction: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 20 * 60,
            dedup_max_entries: 5_000,
            queue_mode: MessageQueueMode::Direct,
            collect_debounce_ms: 1_500,
            injection_guard: true,
            ack_reaction: None,
        }
    }
}

/// How rapid consecutive channel messages are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageQueueMode {
    /// Each message starts its own turn.
    #[default]
    Direct,
    /// Buffer messages; concatenate and process as one turn after a quiet period.
    Collect,
}

// ── Runner ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Retries allowed per turn, shared by every recovery branch.
    pub max_retries: u32,
    /// Tool results longer than this are truncated on context overflow.
    pub tool_result_max_chars: usize,
    pub rate_limit_base_ms: u64,
    pub rate_limit_max_ms: u64,
    pub timeout_base_ms: u64,
    pub timeout_max_ms: u64,
    /// Relative jitter applied to rate-limit backoff (0.1 = ±10%).
    pub jitter_ratio: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            tool_result_max_chars: 8_000,
            rate_limit_base_ms: 1_000,
            rate_limit_max_ms: 30_000,
            timeout_base_ms: 500,
            timeout_max_ms: 5_000,
            jitter_ratio: 0.1,
        }
    }
}

// ── Delivery ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Chunk size used when a channel does not advertise its own limit.
    pub text_limit: usize,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub typing_interval_secs: u64,
    /// Hard ceiling on how long a typing indicator may run.
    pub typing_ttl_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            text_limit: 4_000,
            pacing_min_ms: 800,
            pacing_max_ms: 2_500,
            typing_interval_secs: 6,
            typing_ttl_secs: 120,
        }
    }
}

/// Block coalescing for streamed replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub idle_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_chars: 800,
            max_chars: 1_200,
            idle_ms: 1_000,
        }
    }
}

// ── Providers & credentials ─────────────────────────────────────────────────

/// Configuration for a single model provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    pub enabled: bool,

    /// Credentials rotated by the credential pool.
    #[serde(serialize_with = "serialize_secret_vec")]
    pub api_keys: Vec<Secret<String>>,

    /// Single-key shorthand; merged in front of `api_keys`.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,

    /// OpenAI-compatible endpoint base URL.
    pub base_url: Option<String>,
}

impl ProviderEntry {
    /// All configured keys, single-key shorthand first, empty values dropped.
    #[must_use]
    pub fn keys(&self) -> Vec<Secret<String>> {
        self.api_key
            .iter()
            .chain(self.api_keys.iter())
            .filter(|k| !k.expose_secret().trim().is_empty())
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("enabled", &self.enabled)
            .field("api_keys", &format!("[{} REDACTED]", self.api_keys.len()))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            api_keys: Vec::new(),
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Where credential cooldowns are persisted. Defaults to
    /// `<data dir>/credential-cooldowns.json`.
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Extra labels attached to every metric.
    pub labels: HashMap<String, String>,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn serialize_secret_vec<S: serde::Serializer>(
    secrets: &[Secret<String>],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;

    let mut seq = serializer.serialize_seq(Some(secrets.len()))?;
    for s in secrets {
        seq.serialize_element(s.expose_secret())?;
    }
    seq.end()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CourierConfig::default();
        assert_eq!(cfg.agents.defaults.id, "main");
        assert_eq!(cfg.session.isolation, IsolationMode::PerPeer);
        assert_eq!(cfg.dispatch.queue_mode, MessageQueueMode::Direct);
        assert!(cfg.delivery.pacing_min_ms <= cfg.delivery.pacing_max_ms);
        assert!(cfg.streaming.min_chars <= cfg.streaming.max_chars);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: CourierConfig = toml::from_str(
            r#"
            [agents.defaults]
            id = "ops"
            aliases = { fast = "openai/gpt-4o-mini" }

            [agents.defaults.model]
            primary = "anthropic/claude-sonnet"
            fallbacks = ["fast"]

            [[agents.list]]
            id = "family"
            thinking = "low"

            [[bindings]]
            agent_id = "family"
            channel = "telegram"
            peer_id = "-100123"

            [session]
            isolation = "per-thread"

            [session.reset]
            mode = "idle"
            idle_minutes = 15

            [dispatch]
            queue_mode = "collect"

            [providers.openai]
            api_keys = ["sk-one", "sk-two"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.agents.defaults.id, "ops");
        assert_eq!(cfg.model_for("ops").fallbacks, vec!["fast"]);
        assert_eq!(cfg.thinking_for("family"), Some("low"));
        assert_eq!(cfg.bindings[0].peer_id.as_deref(), Some("-100123"));
        assert_eq!(cfg.session.isolation, IsolationMode::PerThread);
        assert_eq!(cfg.session.reset.mode, ResetMode::Idle);
        assert_eq!(cfg.session.reset.idle_minutes, 15);
        assert_eq!(cfg.dispatch.queue_mode, MessageQueueMode::Collect);
        assert_eq!(cfg.providers["openai"].keys().len(), 2);
        // untouched sections keep their defaults
        assert_eq!(cfg.runner.max_retries, 4);
    }

    #[test]
    fn provider_keys_merge_and_skip_blank() {
        let entry = ProviderEntry {
            api_key: Some(Secret::new("sk-main".into())),
            api_keys: vec![Secret::new("  ".into()), Secret::new("sk-b".into())],
            ..Default::default()
        };
        let keys: Vec<String> = entry
            .keys()
            .iter()
            .map(|k| k.expose_secret().clone())
            .collect();
        assert_eq!(keys, vec!["sk-main", "sk-b"]);
    }

    #[test]
    fn provider_debug_redacts_keys() {
        let entry = ProviderEntry {
            api_key: Some(Secret::new("sk-very-secret".into())),
            ..Default::default()
        };
        assert!(!format!("{entry:?}").contains("sk-very-secret"));
    }
}
