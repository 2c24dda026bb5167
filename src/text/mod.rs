//! Text processing for narration: normalization and provider-sized segmentation.

pub mod normalizer;
pub mod segmenter;

pub use normalizer::normalize;
pub use segmenter::segment;

use serde::{Deserialize, Serialize};

/// One provider-sized segment of a chapter's narratable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationPart {
    /// Chapter this part was derived from.
    pub chapter_id: String,
    /// The chapter title without any part suffix.
    pub base_title: String,
    /// 0-based index of this part within the chapter.
    pub part_index: usize,
    /// Total parts derived from the same chapter.
    pub part_count: usize,
    /// Narration-ready text, at most the segmentation limit in characters.
    pub text: String,
    /// Deterministic id derived from `(chapter_id, part_index)`, stable
    /// across repeated segmentation of unchanged content.
    pub id: String,
}

impl NarrationPart {
    pub fn new(
        chapter_id: impl Into<String>,
        base_title: impl Into<String>,
        part_index: usize,
        part_count: usize,
        text: impl Into<String>,
    ) -> Self {
        let chapter_id = chapter_id.into();
        let id = part_id(&chapter_id, part_index);
        Self {
            chapter_id,
            base_title: base_title.into(),
            part_index,
            part_count,
            text: text.into(),
            id,
        }
    }

    /// Displayable title: `"{title} (Part {n})"` for multi-part chapters,
    /// the bare title otherwise.
    pub fn title(&self) -> String {
        if self.part_count > 1 {
            format!("{} (Part {})", self.base_title, self.part_index + 1)
        } else {
            self.base_title.clone()
        }
    }
}

/// Derive the deterministic part id for `(chapter_id, part_index)`.
pub fn part_id(chapter_id: &str, part_index: usize) -> String {
    format!("{}_pt{:03}", chapter_id, part_index)
}

/// Strip a trailing `" (Part N)"` suffix from a display title, recovering
/// the base title. Titles without the exact suffix pattern pass through
/// unchanged. Display-only: grouping is always done by chapter id.
pub fn strip_part_suffix(title: &str) -> &str {
    let Some(rest) = title.strip_suffix(')') else {
        return title;
    };
    let Some(open) = rest.rfind(" (Part ") else {
        return title;
    };
    let digits = &rest[open + " (Part ".len()..];
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        &title[..open]
    } else {
        title
    }
}
