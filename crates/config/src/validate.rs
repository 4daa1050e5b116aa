//! Semantic validation of a loaded configuration.
//!
//! Parsing already rejects malformed files; this pass reports values that
//! parse fine but cannot work together (inverted ranges, unknown agents,
//! unresolvable models, bad timezones).

use std::path::{Path, PathBuf};

use crate::{
    loader::{find_config_file, load_config},
    schema::CourierConfig,
};

const THINK_LEVELS: &[&str] = &["off", "low", "medium", "high"];

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "delivery.pacing_min_ms"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Load the config at `path` (or the discovered one) and validate it.
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let path = path.map(Path::to_path_buf).or_else(find_config_file);
    let Some(path) = path else {
        let mut result = validate_config(&CourierConfig::default());
        result.push(Severity::Info, "", "no config file found, using defaults");
        return result;
    };

    match load_config(&path) {
        Ok(cfg) => {
            let mut result = validate_config(&cfg);
            result.config_path = Some(path);
            result
        },
        Err(e) => {
            let mut result = ValidationResult {
                config_path: Some(path),
                ..Default::default()
            };
            result.push(Severity::Error, "", e.to_string());
            result
        },
    }
}

/// Validate an already-loaded configuration.
#[must_use]
pub fn validate_config(cfg: &CourierConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    check_agents(cfg, &mut result);
    check_ranges(cfg, &mut result);
    check_session(cfg, &mut result);

    result
}

fn check_agents(cfg: &CourierConfig, result: &mut ValidationResult) {
    let known_agent = |id: &str| id == cfg.agents.defaults.id || cfg.agent(id).is_some();

    for (i, binding) in cfg.bindings.iter().enumerate() {
        if !known_agent(&binding.agent_id) {
            result.push(
                Severity::Warning,
                format!("bindings[{i}].agent_id"),
                format!("unknown agent \"{}\"", binding.agent_id),
            );
        }
        if binding.channel.trim().is_empty() {
            result.push(
                Severity::Error,
                format!("bindings[{i}].channel"),
                "binding has no channel",
            );
        }
    }

    let mut models = vec![("agents.defaults.model".to_string(), &cfg.agents.defaults.model)];
    for (i, agent) in cfg.agents.list.iter().enumerate() {
        if let Some(model) = agent.model.as_ref() {
            models.push((format!("agents.list[{i}].model"), model));
        }
    }
    for (path, model) in models {
        if model.primary.trim().is_empty() {
            result.push(Severity::Error, format!("{path}.primary"), "empty model");
        }
        for (name, value) in std::iter::once(("primary".to_string(), &model.primary)).chain(
            model
                .fallbacks
                .iter()
                .enumerate()
                .map(|(i, f)| (format!("fallbacks[{i}]"), f)),
        ) {
            let resolvable = value.contains('/') || cfg.agents.defaults.aliases.contains_key(value);
            if !value.trim().is_empty() && !resolvable {
                result.push(
                    Severity::Warning,
                    format!("{path}.{name}"),
                    format!("\"{value}\" is neither an alias nor provider/model"),
                );
            }
        }
    }

    let levels = std::iter::once(("agents.defaults.thinking".to_string(), &cfg.agents.defaults.thinking))
        .chain(
            cfg.agents
                .list
                .iter()
                .enumerate()
                .map(|(i, a)| (format!("agents.list[{i}].thinking"), &a.thinking)),
        );
    for (path, level) in levels {
        if let Some(level) = level
            && !THINK_LEVELS.contains(&level.as_str())
        {
            result.push(
                Severity::Error,
                path,
                format!("unknown thinking level \"{level}\" (expected off, low, medium, high)"),
            );
        }
    }
}

fn check_ranges(cfg: &CourierConfig, result: &mut ValidationResult) {
    if cfg.delivery.pacing_min_ms > cfg.delivery.pacing_max_ms {
        result.push(
            Severity::Error,
            "delivery.pacing_min_ms",
            "pacing_min_ms is greater than pacing_max_ms",
        );
    }
    if cfg.delivery.text_limit == 0 {
        result.push(Severity::Error, "delivery.text_limit", "must be positive");
    }
    if cfg.streaming.max_chars == 0 || cfg.streaming.min_chars > cfg.streaming.max_chars {
        result.push(
            Severity::Error,
            "streaming",
            "min_chars must not exceed a positive max_chars",
        );
    }
    if cfg.runner.max_retries == 0 {
        result.push(
            Severity::Warning,
            "runner.max_retries",
            "0 disables every recovery path",
        );
    }
    if !(0.0..1.0).contains(&cfg.runner.jitter_ratio) {
        result.push(
            Severity::Error,
            "runner.jitter_ratio",
            "must be in [0, 1)",
        );
    }
    if cfg.dispatch.dedup_window_secs == 0 {
        result.push(
            Severity::Warning,
            "dispatch.dedup_window_secs",
            "0 disables duplicate suppression",
        );
    }
}

fn check_session(cfg: &CourierConfig, result: &mut ValidationResult) {
    let reset = &cfg.session.reset;
    if reset.at_hour > 23 {
        result.push(
            Severity::Error,
            "session.reset.at_hour",
            format!("{} is not an hour of the day", reset.at_hour),
        );
    }
    if let Some(tz) = reset.timezone.as_deref()
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        result.push(
            Severity::Error,
            "session.reset.timezone",
            format!("unknown timezone \"{tz}\""),
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::AgentBinding};

    #[test]
    fn default_config_is_clean() {
        let result = validate_config(&CourierConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn inverted_pacing_is_an_error() {
        let mut cfg = CourierConfig::default();
        cfg.delivery.pacing_min_ms = 5_000;
        cfg.delivery.pacing_max_ms = 100;
        let result = validate_config(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "delivery.pacing_min_ms")
        );
    }

    #[test]
    fn unknown_agent_binding_warns() {
        let mut cfg = CourierConfig::default();
        cfg.bindings.push(AgentBinding {
            agent_id: "ghost".into(),
            channel: "telegram".into(),
            ..Default::default()
        });
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn bad_timezone_and_hour() {
        let mut cfg = CourierConfig::default();
        cfg.session.reset.timezone = Some("Mars/Olympus".into());
        cfg.session.reset.at_hour = 30;
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn unresolvable_fallback_warns() {
        let mut cfg = CourierConfig::default();
        cfg.agents.defaults.model.fallbacks = vec!["speedy".into()];
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Warning), 1);

        cfg.agents
            .defaults
            .aliases
            .insert("speedy".into(), "openai/gpt-4o-mini".into());
        assert_eq!(validate_config(&cfg).count(Severity::Warning), 0);
    }

    #[test]
    fn bad_thinking_level() {
        let mut cfg = CourierConfig::default();
        cfg.agents.defaults.thinking = Some("extreme".into());
        assert!(validate_config(&cfg).has_errors());
    }

    #[test]
    fn parse_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[runner\nmax_retries = ").unwrap();
        let result = validate(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
