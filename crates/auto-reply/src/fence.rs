//! Fenced code block scanning shared by the chunker and the coalescer.

use std::ops::Range;

/// Byte ranges of fenced blocks, from the start of the opening fence line to
/// the end of the closing fence line (including its newline). An unclosed
/// fence runs to the end of `text`.
#[must_use]
pub fn fence_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, &str)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let Some(marker) = fence_marker(line) else {
            continue;
        };
        match open {
            None => open = Some((start, marker)),
            Some((open_start, open_marker)) if marker.starts_with(open_marker) => {
                spans.push(open_start..offset);
                open = None;
            },
            Some(_) => {},
        }
    }
    if let Some((open_start, _)) = open {
        spans.push(open_start..text.len());
    }
    spans
}

/// The fence run (```` ``` ```` or `~~~`, possibly longer) a line opens or
/// closes with, if any.
fn fence_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    // More than three spaces of indentation is a code block, not a fence.
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let ch = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = trimmed.chars().take_while(|c| *c == ch).count();
    (run >= 3).then(|| &trimmed[..run])
}

/// Whether cutting at byte `pos` would split a fenced block.
#[must_use]
pub fn splits_fence(spans: &[Range<usize>], pos: usize) -> bool {
    spans.iter().any(|s| s.start < pos && pos < s.end)
}

/// The span `pos` falls strictly inside, if any.
#[must_use]
pub fn enclosing_span(spans: &[Range<usize>], pos: usize) -> Option<Range<usize>> {
    spans.iter().find(|s| s.start < pos && pos < s.end).cloned()
}

/// Whether `text` ends inside an unclosed fence (odd fence parity).
#[must_use]
pub fn has_open_fence(text: &str) -> bool {
    open_fence_line(text).is_some()
}

/// The opening line (without newline) of the fence left open at the end of
/// `text`.
#[must_use]
pub fn open_fence_line(text: &str) -> Option<&str> {
    let mut open: Option<(&str, &str)> = None;
    for line in text.split_inclusive('\n') {
        let Some(marker) = fence_marker(line) else {
            continue;
        };
        match open {
            None => open = Some((line.trim_end_matches(['\n', '\r']), marker)),
            Some((_, open_marker)) if marker.starts_with(open_marker) => open = None,
            Some(_) => {},
        }
    }
    open.map(|(line, _)| line)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_closed_and_open_spans() {
        let text = "intro\n```rust\nfn a() {}\n```\nmid\n~~~\nopen";
        let spans = fence_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].clone()], "```rust\nfn a() {}\n```\n");
        assert_eq!(&text[spans[1].clone()], "~~~\nopen");
        assert!(has_open_fence(text));
        assert_eq!(open_fence_line(text), Some("~~~"));
    }

    #[test]
    fn shorter_run_does_not_close() {
        let text = "````\n```\nstill inside\n````\n";
        let spans = fence_spans(text);
        assert_eq!(spans, vec![0..text.len()]);
        assert!(!has_open_fence(text));
    }

    #[test]
    fn split_detection() {
        let text = "a\n```\ncode\n```\nb";
        let spans = fence_spans(text);
        let inside = text.find("code").unwrap();
        assert!(splits_fence(&spans, inside));
        assert!(!splits_fence(&spans, spans[0].start));
        assert!(!splits_fence(&spans, spans[0].end));
        assert_eq!(enclosing_span(&spans, inside), Some(spans[0].clone()));
    }

    #[test]
    fn indented_code_is_not_a_fence() {
        assert!(fence_spans("    ```\nnot a fence").is_empty());
    }
}
