//! Failure classification for model calls.
//!
//! This is the only place that knows what provider errors look like. It maps
//! an opaque error to a [`FailureReason`] plus two independent signals
//! (context overflow and reasoning-level rejection) and an optional
//! Retry-After hint; the runner branches on that and nothing else.

use courier_auth::FailureReason;

/// Everything the runner needs to know about a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignals {
    pub reason: FailureReason,
    pub context_overflow: bool,
    pub reasoning_rejected: bool,
    pub retry_after_ms: Option<u64>,
    pub message: String,
}

const CONTEXT_WINDOW_PATTERNS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
    "too many tokens",
    "token limit",
    "prompt is too long",
    "request too large",
    "request_too_large",
    "content_too_large",
    "input is too long",
];

const REASONING_PATTERNS: &[&str] = &[
    "reasoning_effort",
    "reasoning effort",
    "reasoning is not supported",
    "does not support reasoning",
    "thinking is not supported",
    "does not support thinking",
    "unsupported thinking",
];

const BILLING_PATTERNS: &[&str] = &[
    "insufficient_quota",
    "exceeded your current quota",
    "billing",
    "credit balance",
    "payment required",
    "http 402",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "http 429",
    "status 429",
    "status: 429",
    "too many requests",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "quota exceeded",
    "overloaded",
    "http 529",
];

const AUTH_PATTERNS: &[&str] = &[
    "http 401",
    "http 403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "authentication",
    "permission denied",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "deadline exceeded",
    "http 500",
    "http 502",
    "http 503",
    "http 504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "connection reset",
    "connection closed",
];

const FORMAT_PATTERNS: &[&str] = &[
    "http 400",
    "http 422",
    "bad request",
    "invalid_request",
    "invalid request",
    "unprocessable",
    "malformed",
];

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

#[must_use]
pub fn is_context_overflow(msg: &str) -> bool {
    matches_any(&msg.to_ascii_lowercase(), CONTEXT_WINDOW_PATTERNS)
}

#[must_use]
pub fn is_reasoning_rejection(msg: &str) -> bool {
    matches_any(&msg.to_ascii_lowercase(), REASONING_PATTERNS)
}

/// Classify an error message into the closed failure taxonomy.
///
/// Overflow and reasoning rejections are request-shaped (usually HTTP 400)
/// but recoverable, so they are never reported as `Format`.
#[must_use]
pub fn classify_message(msg: &str) -> FailureReason {
    let lower = msg.to_ascii_lowercase();

    if matches_any(&lower, BILLING_PATTERNS) {
        return FailureReason::Billing;
    }
    if matches_any(&lower, RATE_LIMIT_PATTERNS) {
        return FailureReason::RateLimit;
    }
    if matches_any(&lower, AUTH_PATTERNS) {
        return FailureReason::Auth;
    }
    if matches_any(&lower, TIMEOUT_PATTERNS) {
        return FailureReason::Timeout;
    }
    if matches_any(&lower, FORMAT_PATTERNS)
        && !matches_any(&lower, CONTEXT_WINDOW_PATTERNS)
        && !matches_any(&lower, REASONING_PATTERNS)
    {
        return FailureReason::Format;
    }
    FailureReason::Unknown
}

#[must_use]
pub fn classify(err: &anyhow::Error) -> FailureReason {
    classify_message(&format!("{err:#}"))
}

/// Classify and extract every signal from one error.
#[must_use]
pub fn analyze(err: &anyhow::Error, retry_cap_ms: u64) -> ErrorSignals {
    let message = format!("{err:#}");
    ErrorSignals {
        reason: classify_message(&message),
        context_overflow: is_context_overflow(&message),
        reasoning_rejected: is_reasoning_rejection(&message),
        retry_after_ms: extract_retry_after_ms(&message, retry_cap_ms),
        message,
    }
}

/// Parse a delay that starts somewhere in `fragment`. Bare numbers are
/// milliseconds when `bare_is_ms`, seconds otherwise.
fn parse_delay_ms(fragment: &str, bare_is_ms: bool, max_ms: u64) -> Option<u64> {
    let start = fragment.find(|c: char| c.is_ascii_digit())?;
    // Only accept a number that follows the needle closely.
    if start > 2 {
        return None;
    }
    let tail = &fragment[start..];
    let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
    let amount: u64 = tail[..digits].parse().ok()?;
    let unit = tail[digits..].trim_start();

    let ms = if unit.starts_with("ms") || unit.starts_with("milli") {
        amount
    } else if unit.starts_with('s') {
        amount.saturating_mul(1_000)
    } else if unit.starts_with('m') {
        amount.saturating_mul(60_000)
    } else if bare_is_ms {
        amount
    } else {
        amount.saturating_mul(1_000)
    };
    Some(ms.clamp(1, max_ms.max(1)))
}

/// Find a Retry-After style hint in an error message, e.g.
/// `retry_after_ms=1500`, `Retry-After: 30`, `try again in 20s`.
#[must_use]
pub fn extract_retry_after_ms(msg: &str, max_ms: u64) -> Option<u64> {
    let lower = msg.to_ascii_lowercase();
    [
        ("retry_after_ms=", true),
        ("retry-after-ms:", true),
        ("retry-after:", false),
        ("retry_after=", false),
        ("retry after ", false),
        ("try again in ", false),
    ]
    .into_iter()
    .find_map(|(needle, bare_is_ms)| {
        let idx = lower.find(needle)?;
        parse_delay_ms(&lower[idx + needle.len()..], bare_is_ms, max_ms)
    })
}

/// Append a machine-readable Retry-After marker to an error message.
#[must_use]
pub fn with_retry_after_marker(message: String, retry_after_ms: Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!("{message} (retry_after_ms={ms})"),
        None => message,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("OpenAI API error HTTP 429 Too Many Requests", FailureReason::RateLimit)]
    #[case("provider overloaded, please retry", FailureReason::RateLimit)]
    #[case(
        "HTTP 429: You exceeded your current quota (insufficient_quota)",
        FailureReason::Billing
    )]
    #[case("HTTP 401 Unauthorized: invalid api key", FailureReason::Auth)]
    #[case("HTTP 403 Forbidden", FailureReason::Auth)]
    #[case("request timed out after 120s", FailureReason::Timeout)]
    #[case("HTTP 503 Service Unavailable", FailureReason::Timeout)]
    #[case("HTTP 400 Bad Request: messages[2].role is invalid", FailureReason::Format)]
    #[case(
        "HTTP 400 Bad Request: context_length_exceeded",
        FailureReason::Unknown
    )]
    #[case("something odd happened", FailureReason::Unknown)]
    fn classifies(#[case] msg: &str, #[case] expected: FailureReason) {
        assert_eq!(classify_message(msg), expected);
    }

    #[test]
    fn signals_are_independent() {
        let err = anyhow::anyhow!("HTTP 400: Unsupported value: 'reasoning_effort' is not supported");
        let signals = analyze(&err, 30_000);
        assert!(signals.reasoning_rejected);
        assert!(!signals.context_overflow);
        assert_ne!(signals.reason, FailureReason::Format);

        let err = anyhow::anyhow!("This model's maximum context length is 128000 tokens");
        let signals = analyze(&err, 30_000);
        assert!(signals.context_overflow);
    }

    #[test]
    fn context_chain_is_visible() {
        let err = anyhow::anyhow!("HTTP 429 Too Many Requests").context("prompt failed");
        assert_eq!(classify(&err), FailureReason::RateLimit);
    }

    #[rstest]
    #[case("rate limited (retry_after_ms=1500)", Some(1_500))]
    #[case("HTTP 429 Retry-After: 7", Some(7_000))]
    #[case("Please try again in 20s.", Some(20_000))]
    #[case("Please try again in 250ms", Some(250))]
    #[case("retry after 2 minutes", Some(30_000))]
    #[case("no hint here", None)]
    fn retry_after(#[case] msg: &str, #[case] expected: Option<u64>) {
        assert_eq!(extract_retry_after_ms(msg, 30_000), expected);
    }

    #[test]
    fn marker_roundtrips_through_extraction() {
        let msg = with_retry_after_marker("HTTP 429".into(), Some(4_000));
        assert_eq!(extract_retry_after_ms(&msg, 30_000), Some(4_000));
        assert_eq!(with_retry_after_marker("x".into(), None), "x");
    }
}
