//! Chapter-level manifest assembly.
//!
//! Folds completed parts back into one entry per chapter. Grouping is
//! keyed on chapter id; the `"(Part N)"` title suffix is display-only and
//! is stripped when deriving the entry title.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::orchestrator::CompletedPart;
use crate::text::strip_part_suffix;

/// Rough narration pace used for the duration hint.
const CHARS_PER_MINUTE: f32 = 1000.0;

/// One chapter's finished audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub chapter_id: String,
    pub title: String,
    /// Storage reference of the chapter's representative audio artifact.
    pub audio_ref: String,
    /// Estimated narration length in minutes, from character count.
    pub duration_hint: Option<f32>,
}

/// The final chapter-to-audio mapping produced after a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudiobookManifest {
    pub entries: Vec<ManifestEntry>,
}

impl AudiobookManifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Fold completed parts into one manifest entry per chapter, in the
/// chapters' original order.
///
/// A multi-part chapter keeps the first part's audio reference as its
/// representative artifact; concatenating part audio is a server-side
/// merge step outside this core.
pub fn assemble(completed: &[CompletedPart]) -> AudiobookManifest {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&CompletedPart>> = HashMap::new();

    for part in completed {
        let chapter_id = part.part.chapter_id.as_str();
        let group = groups.entry(chapter_id).or_default();
        if group.is_empty() {
            order.push(chapter_id);
        }
        group.push(part);
    }

    let entries = order
        .into_iter()
        .filter_map(|chapter_id| {
            let mut parts = groups.remove(chapter_id)?;
            parts.sort_by_key(|p| p.part.part_index);
            let first = parts.first()?;

            let narrated_chars: usize = parts
                .iter()
                .map(|p| p.part.text.chars().count())
                .sum();
            let duration_hint = Some(narrated_chars as f32 / CHARS_PER_MINUTE);

            Some(ManifestEntry {
                chapter_id: chapter_id.to_string(),
                title: strip_part_suffix(&first.part.title()).to_string(),
                audio_ref: first.audio_ref.clone(),
                duration_hint,
            })
        })
        .collect();

    AudiobookManifest { entries }
}
