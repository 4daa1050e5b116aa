/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in raw
/// config text before it is parsed.
///
/// Unresolvable variables without a fallback are left as-is so the parse
/// error (or the literal value) points at the missing variable.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// [`substitute_env`] with an injectable lookup, so tests never touch the
/// process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut inner = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            inner.push(c);
        }

        if !closed || inner.is_empty() {
            result.push_str("${");
            result.push_str(&inner);
            continue;
        }

        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (inner.as_str(), None),
        };

        match lookup(name).filter(|v| !v.is_empty()) {
            Some(value) => result.push_str(&value),
            None => match fallback {
                Some(fallback) => result.push_str(fallback),
                None => {
                    result.push_str("${");
                    result.push_str(&inner);
                    result.push('}');
                },
            },
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "COURIER_TEST_KEY" => Some("sk-live".to_string()),
            "COURIER_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("api_key = \"${COURIER_TEST_KEY}\"", lookup),
            "api_key = \"sk-live\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${COURIER_MISSING}", lookup),
            "${COURIER_MISSING}"
        );
    }

    #[test]
    fn fallback_used_for_missing_or_empty() {
        assert_eq!(substitute_env_with("${COURIER_MISSING:-x}", lookup), "x");
        assert_eq!(substitute_env_with("${COURIER_EMPTY:-y}", lookup), "y");
        assert_eq!(
            substitute_env_with("${COURIER_TEST_KEY:-unused}", lookup),
            "sk-live"
        );
    }

    #[test]
    fn malformed_placeholder_is_literal() {
        assert_eq!(substitute_env_with("cost: ${oops", lookup), "cost: ${oops");
        assert_eq!(substitute_env_with("$5 and ${}", lookup), "$5 and ${");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
