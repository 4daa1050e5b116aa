//! Split a reply into pieces that fit a channel's message limit.
//!
//! Break preference inside the allowed window: paragraph, sentence, line,
//! word, then a hard cut. A break never lands inside a fenced code block;
//! when a single block is larger than the limit it is closed at the end of
//! one chunk and reopened at the start of the next.

use crate::fence::{enclosing_span, fence_spans, splits_fence};

/// Byte offset of the `n`th char (or the end of `s`).
fn byte_at_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Last break position of the preferred kind within `rest[..window_end]`.
fn best_break(rest: &str, window_end: usize, spans: &[std::ops::Range<usize>]) -> Option<usize> {
    let window = &rest[..window_end];
    let allowed = |pos: usize| pos > 0 && !splits_fence(spans, pos);

    let paragraph = window
        .rmatch_indices("\n\n")
        .map(|(i, _)| i + 1)
        .find(|&i| allowed(i));
    let sentence = || {
        window
            .char_indices()
            .zip(window.chars().skip(1))
            .filter(|((_, c), next)| matches!(c, '.' | '!' | '?') && next.is_whitespace())
            .map(|((i, _), _)| i + 1)
            .filter(|&i| allowed(i))
            .last()
    };
    let line = || {
        window
            .rmatch_indices('\n')
            .map(|(i, _)| i + 1)
            .find(|&i| allowed(i))
    };
    let word = || window.rmatch_indices(' ').map(|(i, _)| i).find(|&i| allowed(i));

    paragraph.or_else(sentence).or_else(line).or_else(word)
}

#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text.trim_start_matches('\n').to_string();

    let mut push = |chunk: &str| {
        let chunk = chunk.trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
    };

    while !rest.is_empty() {
        if rest.chars().count() <= max {
            push(&rest);
            break;
        }

        let window_end = byte_at_char(&rest, max);
        let spans = fence_spans(&rest);

        let next = if let Some(cut) = best_break(&rest, window_end, &spans) {
            push(&rest[..cut]);
            rest[cut..].to_string()
        } else {
            match enclosing_span(&spans, window_end) {
                Some(span) if span.start > 0 => {
                    push(&rest[..span.start]);
                    rest[span.start..].to_string()
                },
                Some(span) => split_oversized_fence(&rest, &rest[span], max, window_end, &mut push),
                None => {
                    push(&rest[..window_end]);
                    rest[window_end..].to_string()
                },
            }
        };
        let next = next.trim_start_matches('\n');
        rest = next.strip_prefix(' ').unwrap_or(next).to_string();
    }

    chunks
}

/// `rest` starts with a fenced block longer than `max`. Emit as much of it
/// as fits, closed, and return the remainder reopened with the same fence.
fn split_oversized_fence(
    rest: &str,
    block: &str,
    max: usize,
    window_end: usize,
    push: &mut impl FnMut(&str),
) -> String {
    let opener = block.lines().next().unwrap_or("```");
    let marker: String = opener
        .trim_start()
        .chars()
        .take_while(|c| *c == '`' || *c == '~')
        .collect();
    let overhead = marker.chars().count() + 1;
    let opener_len = opener.len() + 1;

    if max <= opener.chars().count() + overhead + 8 {
        push(&rest[..window_end]);
        return rest[window_end..].to_string();
    }

    let room = byte_at_char(rest, max - overhead);
    // Prefer a line boundary inside the block.
    let cut = rest[..room]
        .rfind('\n')
        .filter(|&i| i >= opener_len)
        .unwrap_or(room);

    push(&format!("{}\n{marker}", rest[..cut].trim_end_matches('\n')));
    format!("{opener}\n{}", rest[cut..].trim_start_matches('\n'))
}
