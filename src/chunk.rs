//! Title-based element chunker.
//!
//! Packs consecutive [`ExtractedElement`]s into [`Chunk`]s. A new chunk
//! starts at every title element and whenever appending the next element
//! would push the chunk past `max_characters`. Element text is joined with
//! `\n\n`; the chunk takes the page number of its first element and keeps
//! the elements it was built from so embedded titles can be recovered.

use crate::models::{Chunk, ExtractedElement};

/// Split `elements` into title-led chunks of at most `max_characters`.
///
/// Elements with blank text are dropped. A body element longer than the
/// limit is hard-split on whitespace; every piece keeps the element as its
/// source. Title elements are never split, so an oversized title becomes a
/// single chunk that exceeds the limit.
pub fn chunk_by_title(elements: &[ExtractedElement], max_characters: usize) -> Vec<Chunk> {
    let max_chars = max_characters.max(1);
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut current_elements: Vec<ExtractedElement> = Vec::new();

    for element in elements {
        let trimmed = element.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len() // +2 for \n\n separator
        };

        if (element.is_title() || would_be > max_chars) && !current_elements.is_empty() {
            chunks.push(make_chunk(&current_buf, &mut current_elements));
            current_buf.clear();
        }

        if trimmed.len() > max_chars && !element.is_title() {
            for piece in split_oversized(trimmed, max_chars) {
                chunks.push(make_chunk(piece, &mut vec![element.clone()]));
            }
            continue;
        }

        if !current_buf.is_empty() {
            current_buf.push_str("\n\n");
        }
        current_buf.push_str(trimmed);
        current_elements.push(element.clone());
    }

    if !current_elements.is_empty() {
        chunks.push(make_chunk(&current_buf, &mut current_elements));
    }

    chunks
}

/// Hard-split `text` at `max_chars`, preferring newline then space boundaries.
fn split_oversized(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        if split_at == 0 {
            // Limit smaller than the first character.
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .filter(|&pos| pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = &remaining[actual_split..];
    }
    pieces
}

fn make_chunk(text: &str, elements: &mut Vec<ExtractedElement>) -> Chunk {
    let orig_elements = std::mem::take(elements);
    Chunk {
        text: text.trim().to_string(),
        page_number: orig_elements.first().and_then(|e| e.page_number),
        orig_elements,
    }
}
