//! `provider/model` references and fallback chains.

use std::collections::HashMap;

use {
    courier_config::ModelConfig,
    serde::{Deserialize, Serialize},
    tracing::warn,
};

/// A concrete model on a concrete provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse `provider/model`. The model part may itself contain slashes
    /// (`openrouter/meta-llama/llama-3`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (provider, model) = value.trim().split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }

    /// Resolve an alias or a literal `provider/model`.
    #[must_use]
    pub fn resolve(value: &str, aliases: &HashMap<String, String>) -> Option<Self> {
        let value = value.trim();
        match aliases.get(value) {
            Some(target) => Self::parse(target),
            None => Self::parse(value),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Primary followed by configured fallbacks, resolved and deduplicated.
/// Unresolvable entries are skipped with a warning.
#[must_use]
pub fn fallback_chain(config: &ModelConfig, aliases: &HashMap<String, String>) -> Vec<ModelRef> {
    chain_from(
        std::iter::once(config.primary.as_str()).chain(config.fallbacks.iter().map(String::as_str)),
        aliases,
    )
}

/// Like [`fallback_chain`] but with `primary` replacing the configured one.
#[must_use]
pub fn chain_with_override(
    primary: &str,
    config: &ModelConfig,
    aliases: &HashMap<String, String>,
) -> Vec<ModelRef> {
    chain_from(
        std::iter::once(primary).chain(config.fallbacks.iter().map(String::as_str)),
        aliases,
    )
}

fn chain_from<'a>(
    values: impl Iterator<Item = &'a str>,
    aliases: &HashMap<String, String>,
) -> Vec<ModelRef> {
    let mut chain: Vec<ModelRef> = Vec::new();
    for value in values {
        match ModelRef::resolve(value, aliases) {
            Some(model) if !chain.contains(&model) => chain.push(model),
            Some(_) => {},
            None => warn!(model = value, "skipping unresolvable model reference"),
        }
    }
    chain
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> HashMap<String, String> {
        HashMap::from([("fast".to_string(), "openai/gpt-4o-mini".to_string())])
    }

    #[test]
    fn parse_keeps_nested_model_path() {
        let m = ModelRef::parse("openrouter/meta-llama/llama-3").unwrap();
        assert_eq!(m.provider, "openrouter");
        assert_eq!(m.model, "meta-llama/llama-3");
        assert!(ModelRef::parse("no-slash").is_none());
        assert!(ModelRef::parse("/model").is_none());
    }

    #[test]
    fn resolve_alias() {
        assert_eq!(
            ModelRef::resolve("fast", &aliases()),
            Some(ModelRef::new("openai", "gpt-4o-mini"))
        );
        assert_eq!(ModelRef::resolve("fast", &HashMap::new()), None);
    }

    #[test]
    fn chain_dedups_and_skips_bad_entries() {
        let config = ModelConfig {
            primary: "anthropic/claude-sonnet".into(),
            fallbacks: vec![
                "fast".into(),
                "bogus".into(),
                "openai/gpt-4o-mini".into(),
            ],
        };
        let chain = fallback_chain(&config, &aliases());
        assert_eq!(chain, vec![
            ModelRef::new("anthropic", "claude-sonnet"),
            ModelRef::new("openai", "gpt-4o-mini"),
        ]);
    }

    #[test]
    fn override_replaces_primary_only() {
        let config = ModelConfig {
            primary: "anthropic/claude-sonnet".into(),
            fallbacks: vec!["fast".into()],
        };
        let chain = chain_with_override("x/y", &config, &aliases());
        assert_eq!(chain, vec![
            ModelRef::new("x", "y"),
            ModelRef::new("openai", "gpt-4o-mini"),
        ]);
        assert_eq!(chain[0].to_string(), "x/y");
    }
}
