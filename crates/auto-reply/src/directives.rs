//! Inline `++key value` directives.
//!
//! A directive is a line of its own starting with `++`. Recognized ones are
//! stripped from the body; a repeated key keeps the last value. A line with an
//! unknown key or an invalid value stays in the body untouched.

use std::collections::HashMap;

use {
    courier_agents::{ExecMode, ModelRef, ThinkLevel},
    tracing::debug,
};

/// Per-turn overrides parsed from the message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub think: Option<ThinkLevel>,
    /// Alias or `provider/model`, as written.
    pub model: Option<String>,
    pub exec: Option<ExecMode>,
}

impl Directives {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.think.is_none() && self.model.is_none() && self.exec.is_none()
    }
}

/// Apply one directive line. Returns false when the line is not a valid
/// directive.
fn apply(directives: &mut Directives, line: &str, aliases: &HashMap<String, String>) -> bool {
    let Some(rest) = line.trim().strip_prefix("++") else {
        return false;
    };
    let (key, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let value = value.trim();
    if value.is_empty() {
        return false;
    }

    match key.to_ascii_lowercase().as_str() {
        "think" | "thinking" => match value.parse::<ThinkLevel>() {
            Ok(level) => directives.think = Some(level),
            Err(_) => return false,
        },
        "model" => {
            if ModelRef::resolve(value, aliases).is_none() {
                return false;
            }
            directives.model = Some(value.to_string());
        },
        "exec" => match value.parse::<ExecMode>() {
            Ok(mode) => directives.exec = Some(mode),
            Err(_) => return false,
        },
        _ => return false,
    }
    true
}

/// Extract directives from `body`, returning them with the remaining text.
#[must_use]
pub fn parse_directives(body: &str, aliases: &HashMap<String, String>) -> (Directives, String) {
    let mut directives = Directives::default();
    if !body.contains("++") {
        return (directives, body.to_string());
    }

    let kept: Vec<&str> = body
        .lines()
        .filter(|line| !apply(&mut directives, line, aliases))
        .collect();
    if directives.is_empty() {
        return (directives, body.to_string());
    }

    debug!(?directives, "directives parsed");
    (directives, kept.join("\n").trim().to_string())
}
