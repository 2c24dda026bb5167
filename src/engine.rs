//! End-to-end narration runs.
//!
//! The engine is the surface the application shell calls: it normalizes
//! and segments chapter content, gates the batch against the quota ledger,
//! drives the orchestrator, assembles the manifest, and records finished
//! artifacts through the persistence seam.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::assembler::{assemble, AudiobookManifest};
use crate::config::EngineConfig;
use crate::error::{NarrationError, Result};
use crate::orchestrator::{ChapterFailure, Orchestrator};
use crate::quota::{QuotaLedger, QuotaStore};
use crate::speech::{NarrationOptions, SpeechBackend};
use crate::text::{normalize, segment, NarrationPart};

/// A manuscript chapter, consumed read-only from the document layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    /// Position within the project; unique per project.
    pub order: u32,
    /// Markup or plain text; may be empty.
    pub content: String,
}

/// Persistence seam: records a finished audio artifact's location in the
/// external document store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn record(&self, chapter_id: &str, title: &str, audio_ref: &str) -> AnyResult<()>;
}

/// In-memory artifact store for tests and local runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    records: Mutex<Vec<(String, String, String)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(chapter_id, title, audio_ref)` triples, in record order.
    pub async fn records(&self) -> Vec<(String, String, String)> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn record(&self, chapter_id: &str, title: &str, audio_ref: &str) -> AnyResult<()> {
        self.records.lock().await.push((
            chapter_id.to_string(),
            title.to_string(),
            audio_ref.to_string(),
        ));
        Ok(())
    }
}

/// Result of a finished run. The run as a whole succeeds even when
/// individual chapters failed; `failures` names the chapters to re-run.
#[derive(Debug)]
pub struct RunOutcome {
    pub manifest: AudiobookManifest,
    pub failures: Vec<ChapterFailure>,
}

/// The narration core's entry point.
pub struct NarrationEngine {
    backend: Arc<dyn SpeechBackend>,
    ledger: QuotaLedger,
    artifacts: Arc<dyn ArtifactStore>,
    config: EngineConfig,
}

impl NarrationEngine {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        quota_store: Arc<dyn QuotaStore>,
        artifacts: Arc<dyn ArtifactStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            ledger: QuotaLedger::new(quota_store),
            artifacts,
            config,
        }
    }

    /// Narrate `chapters` for `user_id`.
    ///
    /// Quota is charged per chapter, not per part, and reserved before any
    /// backend call: a run that would not fit entirely is rejected with
    /// [`NarrationError::QuotaExceeded`] and zero side effects. Units for
    /// chapters that subsequently fail are released at the end of the run.
    ///
    /// `on_progress(done, total)` fires as parts reach terminal states.
    pub async fn generate<F>(
        &self,
        user_id: &str,
        chapters: &[Chapter],
        options: &NarrationOptions,
        on_progress: F,
    ) -> Result<RunOutcome>
    where
        F: FnMut(usize, usize),
    {
        let (parts, chapter_count) = self.plan(chapters);

        if parts.is_empty() {
            debug!("nothing to narrate for user {}", user_id);
            return Ok(RunOutcome {
                manifest: AudiobookManifest::default(),
                failures: Vec::new(),
            });
        }

        self.ledger.reserve(user_id, chapter_count).await?;

        info!(
            "starting narration run for {}: {} chapter(s), {} part(s)",
            user_id,
            chapter_count,
            parts.len()
        );

        let orchestrator = Orchestrator::new(Arc::clone(&self.backend), self.config.clone());
        let report = orchestrator.run(parts, options, on_progress).await;

        let manifest = assemble(&report.completed);
        for entry in &manifest.entries {
            self.artifacts
                .record(&entry.chapter_id, &entry.title, &entry.audio_ref)
                .await
                .map_err(NarrationError::Persistence)?;
        }

        if !report.failures.is_empty() {
            self.ledger
                .release(user_id, report.failures.len() as u32)
                .await?;
        }

        Ok(RunOutcome {
            manifest,
            failures: report.failures,
        })
    }

    /// Normalize and segment chapters into the submission batch.
    ///
    /// Chapters are taken in `order`; chapters with no narratable text are
    /// skipped and charge no quota.
    fn plan(&self, chapters: &[Chapter]) -> (Vec<NarrationPart>, u32) {
        let mut ordered: Vec<&Chapter> = chapters.iter().collect();
        ordered.sort_by_key(|c| c.order);

        let max_chars = self.config.max_part_chars();
        let mut parts = Vec::new();
        let mut chapter_count = 0;

        for chapter in ordered {
            let text = normalize(&chapter.content);
            if text.is_empty() {
                debug!("skipping chapter {} (no narratable text)", chapter.id);
                continue;
            }
            parts.extend(segment(&chapter.id, &chapter.title, &text, max_chars));
            chapter_count += 1;
        }

        (parts, chapter_count)
    }
}
