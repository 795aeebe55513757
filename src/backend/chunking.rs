//! Sentence splitting for on-device engines that mishandle long utterances

/// Split `text` into sentences for sequential playback.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of the
/// text. The punctuation stays attached to its sentence and a trailing
/// fragment without terminal punctuation is kept. Every returned chunk is
/// trimmed and non-empty.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }

        let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            push_trimmed(&mut chunks, &text[start..end]);
            start = end;
        }
    }

    // Trailing text
    if start < text.len() {
        push_trimmed(&mut chunks, &text[start..]);
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
