//! Shrinking tool output before it goes back into a model's context.

use std::fmt::Write;

const DATA_URI_PREFIX: &str = "data:";
const BASE64_SEPARATOR: &str = ";base64,";
/// Blobs shorter than this are left alone.
const BLOB_MIN_LEN: usize = 200;

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')
}

/// Replace long `data:<mime>;base64,<payload>` URIs with a short placeholder.
fn strip_data_uris(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(DATA_URI_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + DATA_URI_PREFIX.len()..];

        let blob = after.find(BASE64_SEPARATOR).and_then(|sep| {
            let mime = &after[..sep];
            // A mime type never contains whitespace; this rules out prose
            // that merely mentions "data:".
            if mime.is_empty() || mime.contains(char::is_whitespace) {
                return None;
            }
            let payload_start = sep + BASE64_SEPARATOR.len();
            let payload_len = after[payload_start..]
                .bytes()
                .take_while(|b| is_base64_byte(*b))
                .count();
            (payload_len >= BLOB_MIN_LEN).then_some((mime, payload_start + payload_len))
        });

        match blob {
            Some((mime, consumed)) => {
                let _ = write!(out, "[{mime} data removed, {} bytes]", DATA_URI_PREFIX.len() + consumed);
                rest = &after[consumed..];
            },
            None => {
                out.push_str(DATA_URI_PREFIX);
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}

/// Replace runs of at least [`BLOB_MIN_LEN`] hex digits (binary dumps).
fn strip_hex_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut run_start: Option<usize> = None;

    let flush = |out: &mut String, start: usize, end: usize| {
        let len = end - start;
        if len >= BLOB_MIN_LEN {
            let _ = write!(out, "[hex data removed, {len} chars]");
        } else {
            out.push_str(&input[start..end]);
        }
    };

    for (i, ch) in input.char_indices() {
        if ch.is_ascii_hexdigit() {
            run_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = run_start.take() {
            flush(&mut out, start, i);
        }
        out.push(ch);
    }
    if let Some(start) = run_start {
        flush(&mut out, start, input.len());
    }
    out
}

/// Strip embedded blobs, then cut to `max_chars` characters with a visible
/// marker. Returns the input unchanged (modulo blobs) when it already fits.
#[must_use]
pub fn sanitize_tool_result(input: &str, max_chars: usize) -> String {
    let mut result = strip_hex_runs(&strip_data_uris(input));

    let total = result.chars().count();
    if total <= max_chars {
        return result;
    }

    let cut = result
        .char_indices()
        .nth(max_chars)
        .map_or(result.len(), |(i, _)| i);
    result.truncate(cut);
    let _ = write!(result, "\n\n[truncated: {total} chars total]");
    result
}

/// Whether [`sanitize_tool_result`] would change `input`.
#[must_use]
pub fn needs_sanitizing(input: &str, max_chars: usize) -> bool {
    if input.chars().count() > max_chars {
        return true;
    }
    (input.contains(BASE64_SEPARATOR) || input.bytes().filter(u8::is_ascii_hexdigit).count() >= BLOB_MIN_LEN)
        && sanitize_tool_result(input, max_chars) != input
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(sanitize_tool_result("ok", 100), "ok");
        assert!(!needs_sanitizing("ok", 100));
    }

    #[test]
    fn truncates_with_marker() {
        let input = "é".repeat(50);
        let out = sanitize_tool_result(&input, 10);
        assert!(out.starts_with(&"é".repeat(10)));
        assert!(out.ends_with("[truncated: 50 chars total]"));
        assert!(needs_sanitizing(&input, 10));
    }

    #[test]
    fn strips_data_uri() {
        let payload = "A".repeat(400);
        let input = format!("before data:image/png;base64,{payload} after");
        let out = sanitize_tool_result(&input, 10_000);
        assert!(out.starts_with("before [image/png data removed"));
        assert!(out.ends_with(" after"));
        assert!(!out.contains(&payload));
    }

    #[test]
    fn short_data_uri_kept() {
        let input = "see data:text/plain;base64,aGVsbG8= for details";
        assert_eq!(sanitize_tool_result(input, 10_000), input);
        assert!(!needs_sanitizing(input, 10_000));
    }

    #[test]
    fn prose_mentioning_data_is_kept() {
        let input = "the data: field is empty";
        assert_eq!(sanitize_tool_result(input, 10_000), input);
    }

    #[test]
    fn strips_long_hex_runs() {
        let hex = "deadbeef".repeat(40);
        let input = format!("dump: {hex}\nshort: cafe");
        let out = sanitize_tool_result(&input, 10_000);
        assert_eq!(out, "dump: [hex data removed, 320 chars]\nshort: cafe");
        assert!(needs_sanitizing(&input, 10_000));

        let scattered = "ab12 ".repeat(100);
        assert!(!needs_sanitizing(&scattered, 10_000));
    }
}
