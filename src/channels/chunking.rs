//! Splitting long replies for Discord's message size limit
//!
//! Discord rejects messages over 2000 characters. Text is split on paragraph
//! boundaries first, then sentences, then on whitespace or a hard character
//! offset as a last resort.

/// Discord's per-message character cap
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Split `text` into non-empty chunks of at most `limit` characters
///
/// Limits count Unicode scalar values, not bytes. A `limit` of 0 uses
/// [`DISCORD_MESSAGE_LIMIT`].
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = if limit == 0 { DISCORD_MESSAGE_LIMIT } else { limit };
    let text = text.trim();

    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
        let pieces = if char_len(paragraph) > limit {
            split_sentences(paragraph)
        } else {
            vec![paragraph]
        };

        for (i, piece) in pieces.into_iter().enumerate() {
            let separator = if current.is_empty() {
                ""
            } else if i == 0 {
                "\n\n"
            } else {
                " "
            };

            if char_len(&current) + separator.len() + char_len(piece) <= limit {
                current.push_str(separator);
                current.push_str(piece);
                continue;
            }

            flush(&mut chunks, &mut current);

            if char_len(piece) <= limit {
                current.push_str(piece);
            } else {
                chunks.extend(split_hard(piece, limit));
            }
        }
    }

    flush(&mut chunks, &mut current);
    chunks
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split after `.`, `!`, `?` and their full-width forms when followed by
/// whitespace or end of text
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let terminal = matches!(c, '.' | '!' | '?' | '。' | '！' | '？');
        let boundary = match chars.peek() {
            Some((_, next)) => next.is_whitespace() || matches!(c, '。' | '！' | '？'),
            None => true,
        };

        if terminal && boundary {
            let end = idx + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }

    sentences
}

/// Split at the last whitespace within `limit` characters, or at `limit`
fn split_hard(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if char_len(remaining) <= limit {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte offset of the first character past the limit
        let cut = remaining
            .char_indices()
            .nth(limit)
            .map_or(remaining.len(), |(i, _)| i);

        let split_at = remaining[..cut]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        let chunk = remaining[..split_at].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
