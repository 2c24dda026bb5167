//! Markup-to-narration text normalization.
//!
//! Strips the upstream editor's presentation markup and decodes its
//! entities, producing plain text suitable for the segmenter.

/// Entities emitted by the upstream rich-text editor.
const ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
];

/// Normalize chapter markup into narration-ready plain text.
///
/// This function:
/// - Replaces each markup tag with a single space, so words never
///   concatenate across element boundaries
/// - Decodes the standard editor entities exactly once
/// - Collapses whitespace runs to one space and trims
///
/// Pure with no failure modes; empty in, empty out.
pub fn normalize(markup: &str) -> String {
    let stripped = strip_tags(markup);
    let decoded = decode_entities(&stripped);
    collapse_whitespace(&decoded)
}

/// Replace every `<...>` tag with a single space.
///
/// A `<` with no closing delimiter is kept as literal text.
fn strip_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        result.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => {
                result.push(' ');
                rest = &rest[open + close + 1..];
            }
            None => {
                result.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

/// Decode known entities in a single left-to-right pass.
///
/// Decoding runs after tag stripping, so `&lt;b&gt;` becomes literal text
/// rather than a tag. The single pass also guarantees output of one decode
/// is never decoded again (`&amp;nbsp;` yields the literal `&nbsp;`).
fn decode_entities(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        if let Some((entity, replacement)) = ENTITIES.iter().find(|(e, _)| tail.starts_with(e)) {
            result.push_str(replacement);
            rest = &tail[entity.len()..];
        } else {
            result.push('&');
            rest = &tail[1..];
        }
    }

    result.push_str(rest);
    result
}

/// Collapse whitespace runs to single spaces and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}
