//! Framing prepended to the prompt body.

use chrono::{DateTime, Utc};

/// `[channel from sender +Ns HH:MM:SS]`. The elapsed part is the time since
/// the session was last active and is left out for a fresh session.
#[must_use]
pub fn envelope(channel: &str, sender: &str, since_last: Option<chrono::Duration>, now: DateTime<Utc>) -> String {
    let clock = now.format("%H:%M:%S");
    match since_last {
        Some(elapsed) => {
            let secs = elapsed.num_seconds().max(0);
            format!("[{channel} from {sender} +{secs}s {clock}]")
        },
        None => format!("[{channel} from {sender} {clock}]"),
    }
}

/// Prompt text for a turn: one line per media reference, then the body,
/// prefixed with the envelope when there is one.
#[must_use]
pub fn frame(body: &str, media_urls: &[String], envelope: Option<&str>) -> String {
    let mut out = String::new();
    for url in media_urls {
        out.push_str("[media attached: ");
        out.push_str(url);
        out.push_str("]\n");
    }
    if let Some(envelope) = envelope {
        out.push_str(envelope);
        if !body.is_empty() {
            out.push(' ');
        }
    }
    out.push_str(body);
    out
}
