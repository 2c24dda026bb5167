//! Provider-ceiling-aware text segmentation.
//!
//! Splits chapter text that exceeds the speech provider's per-request
//! character limit into an ordered batch of parts, preferring paragraph
//! boundaries, then sentence boundaries, then a hard character split as a
//! last resort for pathological sentences.

use super::NarrationPart;

/// Split a chapter's narratable text into provider-sized parts.
///
/// Lengths are measured in characters. `max_chars` must be positive and
/// comfortably larger than the longest expected sentence; callers derive it
/// from [`crate::config::EngineConfig::max_part_chars`].
///
/// Text at or under the limit yields exactly one part whose text equals the
/// input. Longer text is split at the latest paragraph or sentence boundary
/// at or before the limit. Parts are emitted as a batch with contiguous
/// 0-based indices and a final `part_count` stamped on every part, so ids
/// and counts are stable before anything is submitted downstream.
pub fn segment(
    chapter_id: &str,
    title: &str,
    plain_text: &str,
    max_chars: usize,
) -> Vec<NarrationPart> {
    let pieces = split_text(plain_text, max_chars);
    let part_count = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(part_index, text)| {
            NarrationPart::new(chapter_id, title, part_index, part_count, text)
        })
        .collect()
}

/// Split text into pieces of at most `max_chars` characters.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    // Decompose into the smallest units that fit: paragraphs where
    // possible, sentences for an oversized paragraph, fixed-width slices
    // for an oversized sentence.
    let mut units: Vec<String> = Vec::new();
    for paragraph in text.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) <= max_chars {
            units.push(paragraph.to_string());
        } else {
            for sentence in split_sentences(paragraph) {
                if char_len(&sentence) <= max_chars {
                    units.push(sentence);
                } else {
                    units.extend(hard_split(&sentence, max_chars));
                }
            }
        }
    }

    pack_units(&units, max_chars)
}

/// Greedily pack units into parts, choosing the latest unit boundary at or
/// before `max_chars`. Units within a part are joined with single spaces.
fn pack_units(units: &[String], max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for unit in units {
        let unit_len = char_len(unit);
        if current.is_empty() {
            current.push_str(unit);
            current_len = unit_len;
        } else if current_len + 1 + unit_len <= max_chars {
            current.push(' ');
            current.push_str(unit);
            current_len += 1 + unit_len;
        } else {
            parts.push(std::mem::take(&mut current));
            current.push_str(unit);
            current_len = unit_len;
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Split a paragraph into sentences at terminator-plus-whitespace seams.
///
/// Terminator runs ("?!", "...") stay attached to their sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let mut cut = None;
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?') {
                match chars.peek() {
                    Some((_, next)) if next.is_whitespace() => {
                        cut = Some(i + c.len_utf8());
                        break;
                    }
                    None => {
                        cut = Some(i + c.len_utf8());
                        break;
                    }
                    _ => {}
                }
            }
        }

        match cut {
            Some(end) => {
                let sentence = rest[..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                rest = rest[end..].trim_start();
            }
            None => {
                sentences.push(rest.to_string());
                rest = "";
            }
        }
    }

    sentences
}

/// Fixed-width character split (last resort).
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let width = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = usize::min(start + width, chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        start = end;
    }

    chunks
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
