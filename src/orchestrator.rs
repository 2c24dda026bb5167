//! Narration job orchestration.
//!
//! Drives each part through submit → poll → terminal classification.
//! Chapters are processed strictly sequentially, and within a chapter
//! parts are processed in part order: multi-part chapters are reassembled
//! in order, and the provider documents no concurrent-job guarantee, so
//! provider concurrency stays bounded to one job at a time.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::FailureKind;
use crate::speech::{BackendStatus, NarrationOptions, SpeechBackend, SubmitRequest};
use crate::text::NarrationPart;

/// Lifecycle state of a narration job.
///
/// `queued → processing → {completed | failed}`; there is no transition
/// out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One asynchronous narration lifecycle for a single part.
///
/// Owned exclusively by the orchestrator for the duration of a run and
/// discarded afterwards; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationJob {
    pub part_id: String,
    pub state: JobState,
    /// Status polls issued so far.
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub result_ref: Option<String>,
    pub error_kind: Option<FailureKind>,
}

impl NarrationJob {
    pub fn new(part_id: impl Into<String>) -> Self {
        Self {
            part_id: part_id.into(),
            state: JobState::Queued,
            attempts: 0,
            submitted_at: Utc::now(),
            result_ref: None,
            error_kind: None,
        }
    }

    /// Record the backend acknowledging receipt. No-op once terminal.
    pub fn mark_processing(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Processing;
        }
    }

    /// Transition to `completed` with the audio reference.
    pub fn complete(&mut self, audio_ref: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = JobState::Completed;
            self.result_ref = Some(audio_ref.into());
        }
    }

    /// Transition to `failed` with a classified failure kind.
    pub fn fail(&mut self, kind: FailureKind) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
            self.error_kind = Some(kind);
        }
    }
}

/// A part whose job completed, with the audio it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part: NarrationPart,
    pub audio_ref: String,
}

/// A chapter recorded as failed within a run, named so the user can re-run
/// just that chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub chapter_id: String,
    pub title: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of driving a batch of parts to terminal states.
///
/// A run "succeeds" whenever it finishes; callers distinguish full from
/// partial success by inspecting `failures`.
#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<CompletedPart>,
    pub failures: Vec<ChapterFailure>,
}

/// Drives narration jobs against a speech backend.
pub struct Orchestrator {
    backend: Arc<dyn SpeechBackend>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn SpeechBackend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    /// Drive every part to a terminal state.
    ///
    /// `on_progress(done, total)` fires after each part reaches a terminal
    /// state. A failed part records one [`ChapterFailure`] and skips the
    /// chapter's remaining parts (they still count toward progress);
    /// processing then continues with the next chapter. A chapter is
    /// all-or-nothing: parts that completed before the failure are dropped
    /// from the report, so a failed chapter never surfaces as a success.
    /// Per-part failures never propagate out of the run. There is no
    /// automatic retry within a run; a user-triggered re-run is the retry
    /// mechanism.
    pub async fn run<F>(
        &self,
        parts: Vec<NarrationPart>,
        options: &NarrationOptions,
        mut on_progress: F,
    ) -> RunReport
    where
        F: FnMut(usize, usize),
    {
        let total = parts.len();
        let mut done = 0;
        let mut report = RunReport::default();

        for chapter in group_by_chapter(parts) {
            let chapter_id = chapter[0].chapter_id.clone();
            let base_title = chapter[0].base_title.clone();
            let mut chapter_failed = false;

            for part in chapter {
                if chapter_failed {
                    // Reassembly needs every part, so once one part fails
                    // the rest of the chapter is not worth submitting.
                    done += 1;
                    on_progress(done, total);
                    continue;
                }

                match self.drive_part(&part, options).await {
                    Ok(audio_ref) => {
                        report.completed.push(CompletedPart { part, audio_ref });
                    }
                    Err((kind, message)) => {
                        warn!(
                            "chapter {} failed at part {}: {} ({})",
                            chapter_id, part.part_index, message, kind
                        );
                        report.failures.push(ChapterFailure {
                            chapter_id: chapter_id.clone(),
                            title: base_title.clone(),
                            kind,
                            message,
                        });
                        chapter_failed = true;
                    }
                }

                done += 1;
                on_progress(done, total);
            }

            if chapter_failed {
                // Anything that completed before the failure must not
                // reach the manifest either.
                report
                    .completed
                    .retain(|c| c.part.chapter_id != chapter_id);
            }
        }

        info!(
            "run finished: {} part(s) completed, {} chapter failure(s)",
            report.completed.len(),
            report.failures.len()
        );
        report
    }

    /// Submit one part and poll it to a terminal state.
    async fn drive_part(
        &self,
        part: &NarrationPart,
        options: &NarrationOptions,
    ) -> std::result::Result<String, (FailureKind, String)> {
        let request = SubmitRequest {
            text: part.text.clone(),
            voice: options.voice.clone(),
            quality: options.quality,
            chapter_id: part.chapter_id.clone(),
            part_title: part.title(),
        };

        let mut job = NarrationJob::new(&part.id);

        // A rejected submission means a malformed request, not transient
        // unavailability; it is fatal for the part.
        let handle = match self.backend.submit(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                job.fail(FailureKind::SubmissionError);
                return Err((FailureKind::SubmissionError, e.to_string()));
            }
        };
        debug!("submitted part {} as backend job {}", part.id, handle.job_id);

        while job.attempts < self.config.max_poll_attempts {
            tokio::time::sleep(self.config.poll_interval()).await;
            job.attempts += 1;

            let poll = match self.backend.poll(&handle).await {
                Ok(poll) => poll,
                Err(e) => {
                    // A flaky poll is treated as still-pending; a persistent
                    // outage surfaces as a timeout below.
                    warn!("poll error for part {} (still pending): {}", part.id, e);
                    continue;
                }
            };

            match poll.status {
                BackendStatus::Completed => match poll.audio_ref {
                    Some(audio_ref) => {
                        job.complete(&audio_ref);
                        debug!(
                            "part {} completed after {} poll(s)",
                            part.id, job.attempts
                        );
                        return Ok(audio_ref);
                    }
                    None => {
                        job.fail(FailureKind::BackendFailure);
                        return Err((
                            FailureKind::BackendFailure,
                            "backend reported completion without an audio reference".to_string(),
                        ));
                    }
                },
                BackendStatus::Failed => {
                    job.fail(FailureKind::BackendFailure);
                    let message = poll
                        .error
                        .unwrap_or_else(|| "backend reported failure".to_string());
                    return Err((FailureKind::BackendFailure, message));
                }
                BackendStatus::Processing => job.mark_processing(),
                BackendStatus::Queued => {}
            }
        }

        job.fail(FailureKind::Timeout);
        Err((
            FailureKind::Timeout,
            format!(
                "no terminal status after {} poll(s)",
                self.config.max_poll_attempts
            ),
        ))
    }
}

/// Group a part batch into per-chapter runs, keyed on chapter id and
/// ordered by each chapter's first appearance. Parts within a chapter keep
/// the order they were given in, so one chapter yields one group even if a
/// caller interleaves its parts.
fn group_by_chapter(parts: Vec<NarrationPart>) -> Vec<Vec<NarrationPart>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<NarrationPart>> = HashMap::new();

    for part in parts {
        let group = groups.entry(part.chapter_id.clone()).or_default();
        if group.is_empty() {
            order.push(part.chapter_id.clone());
        }
        group.push(part);
    }

    order
        .into_iter()
        .filter_map(|chapter_id| groups.remove(&chapter_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::ScriptedBackend;
    use crate::text::segment;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 10,
            ..EngineConfig::default()
        }
    }

    fn part(chapter_id: &str, title: &str, index: usize, count: usize) -> NarrationPart {
        NarrationPart::new(chapter_id, title, index, count, format!("text {}", index))
    }

    #[test]
    fn test_job_state_machine_terminal_is_final() {
        let mut job = NarrationJob::new("p1");
        assert_eq!(job.state, JobState::Queued);

        job.mark_processing();
        assert_eq!(job.state, JobState::Processing);

        job.complete("ref://a");
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result_ref.as_deref(), Some("ref://a"));

        // Terminal states are immutable.
        job.fail(FailureKind::Timeout);
        assert_eq!(job.state, JobState::Completed);
        assert!(job.error_kind.is_none());

        let mut failed = NarrationJob::new("p2");
        failed.fail(FailureKind::BackendFailure);
        failed.complete("ref://late");
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.result_ref.is_none());
    }

    #[test]
    fn test_job_state_serialization() {
        assert_eq!(
            serde_json::to_string(&JobState::Processing).unwrap(),
            "\"processing\""
        );
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn test_group_by_chapter() {
        let parts = vec![
            part("ch-1", "A", 0, 2),
            part("ch-1", "A", 1, 2),
            part("ch-2", "B", 0, 1),
        ];
        let chapters = group_by_chapter(parts);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].len(), 2);
        assert_eq!(chapters[1].len(), 1);
    }

    #[test]
    fn test_group_by_chapter_merges_interleaved_parts() {
        // One chapter stays one group even when a caller interleaves its
        // parts with another chapter's.
        let parts = vec![
            part("ch-1", "A", 0, 2),
            part("ch-2", "B", 0, 1),
            part("ch-1", "A", 1, 2),
        ];
        let chapters = group_by_chapter(parts);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0][0].chapter_id, "ch-1");
        assert_eq!(chapters[0].len(), 2);
        assert_eq!(chapters[0][1].part_index, 1);
        assert_eq!(chapters[1][0].chapter_id, "ch-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_parts_in_order() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success("ref://p0");
        backend.push_success("ref://p1");

        let orchestrator = Orchestrator::new(backend.clone(), fast_config());
        let parts = vec![part("ch-1", "A", 0, 2), part("ch-1", "A", 1, 2)];

        let mut progress = Vec::new();
        let report = orchestrator
            .run(parts, &NarrationOptions::default(), |done, total| {
                progress.push((done, total))
            })
            .await;

        assert_eq!(report.failures.len(), 0);
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.completed[0].audio_ref, "ref://p0");
        assert_eq!(report.completed[1].audio_ref, "ref://p1");
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_rejection_is_fatal_and_unretried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_reject("missing voice parameter");

        let orchestrator = Orchestrator::new(backend.clone(), fast_config());
        let report = orchestrator
            .run(
                vec![part("ch-1", "A", 0, 1)],
                &NarrationOptions::default(),
                |_, _| {},
            )
            .await;

        assert_eq!(report.completed.len(), 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::SubmissionError);
        assert_eq!(backend.submit_count(), 1);
        assert_eq!(backend.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_carries_reported_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_failure("voice model crashed");

        let orchestrator = Orchestrator::new(backend, fast_config());
        let report = orchestrator
            .run(
                vec![part("ch-1", "A", 0, 1)],
                &NarrationOptions::default(),
                |_, _| {},
            )
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::BackendFailure);
        assert!(report.failures[0].message.contains("voice model crashed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhaustion_is_timeout_not_backend_failure() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_never_completes();

        let orchestrator = Orchestrator::new(backend.clone(), fast_config());
        let report = orchestrator
            .run(
                vec![part("ch-1", "A", 0, 1)],
                &NarrationOptions::default(),
                |_, _| {},
            )
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Timeout);
        assert_eq!(backend.poll_count(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chapter_does_not_abort_run() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success("ref://ch1");
        backend.push_failure("boom"); // ch-2 part 0; part 1 never submitted
        backend.push_success("ref://ch3");

        let orchestrator = Orchestrator::new(backend.clone(), fast_config());
        let parts = vec![
            part("ch-1", "One", 0, 1),
            part("ch-2", "Two", 0, 2),
            part("ch-2", "Two", 1, 2),
            part("ch-3", "Three", 0, 1),
        ];

        let mut progress = Vec::new();
        let report = orchestrator
            .run(parts, &NarrationOptions::default(), |done, total| {
                progress.push((done, total))
            })
            .await;

        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.completed[0].part.chapter_id, "ch-1");
        assert_eq!(report.completed[1].part.chapter_id, "ch-3");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].chapter_id, "ch-2");
        assert_eq!(report.failures[0].title, "Two");

        // The failed chapter's remaining part was skipped, not submitted.
        assert_eq!(backend.submit_count(), 3);
        // Progress still reaches 100%.
        assert_eq!(progress.last(), Some(&(4, 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_polls_keep_waiting() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_polls(vec![
            crate::speech::PollResponse::queued(),
            crate::speech::PollResponse::queued(),
            crate::speech::PollResponse::processing(),
            crate::speech::PollResponse::completed("ref://slow"),
        ]);

        let orchestrator = Orchestrator::new(backend.clone(), fast_config());
        let report = orchestrator
            .run(
                vec![part("ch-1", "A", 0, 1)],
                &NarrationOptions::default(),
                |_, _| {},
            )
            .await;

        assert_eq!(report.completed.len(), 1);
        assert_eq!(backend.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chapter_failing_after_first_part_yields_no_completed_parts() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success("ref://ch1-p0");
        backend.push_failure("synthesis crashed"); // ch-1 part 1
        backend.push_success("ref://ch2");

        let orchestrator = Orchestrator::new(backend.clone(), fast_config());
        let parts = vec![
            part("ch-1", "One", 0, 2),
            part("ch-1", "One", 1, 2),
            part("ch-2", "Two", 0, 1),
        ];

        let mut progress = Vec::new();
        let report = orchestrator
            .run(parts, &NarrationOptions::default(), |done, total| {
                progress.push((done, total))
            })
            .await;

        // The chapter's earlier success is withdrawn along with the failure:
        // only the healthy chapter remains completed.
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].part.chapter_id, "ch-2");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].chapter_id, "ch-1");
        assert_eq!(report.failures[0].kind, FailureKind::BackendFailure);

        // Both ch-1 parts were submitted; the failure came from the second.
        assert_eq!(backend.submit_count(), 3);
        assert_eq!(progress.last(), Some(&(3, 3)));
    }

    /// Wraps a scripted backend and fails the first N poll calls at the
    /// transport level.
    struct FlakyPollBackend {
        inner: ScriptedBackend,
        poll_failures_left: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::speech::SpeechBackend for FlakyPollBackend {
        async fn submit(
            &self,
            request: &SubmitRequest,
        ) -> anyhow::Result<crate::speech::JobHandle> {
            self.inner.submit(request).await
        }

        async fn poll(
            &self,
            handle: &crate::speech::JobHandle,
        ) -> anyhow::Result<crate::speech::PollResponse> {
            use std::sync::atomic::Ordering;
            if self.poll_failures_left.load(Ordering::SeqCst) > 0 {
                self.poll_failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connection reset");
            }
            self.inner.poll(handle).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_transport_error_counts_as_pending() {
        let inner = ScriptedBackend::new();
        inner.push_success("ref://eventually");
        let backend = Arc::new(FlakyPollBackend {
            inner,
            poll_failures_left: std::sync::atomic::AtomicUsize::new(3),
        });

        let orchestrator = Orchestrator::new(backend, fast_config());
        let report = orchestrator
            .run(
                vec![part("ch-1", "A", 0, 1)],
                &NarrationOptions::default(),
                |_, _| {},
            )
            .await;

        // Three flaky polls burned three attempts but did not fail the part.
        assert_eq!(report.failures.len(), 0);
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].audio_ref, "ref://eventually");
    }

    #[tokio::test(start_paused = true)]
    async fn test_real_segmented_chapter_round_trip() {
        let text = "One sentence here. ".repeat(40);
        let parts = segment("ch-9", "Long", text.trim(), 100);
        let total = parts.len();
        assert!(total > 1);

        let backend = Arc::new(ScriptedBackend::new());
        for i in 0..total {
            backend.push_success(format!("ref://part-{}", i));
        }

        let orchestrator = Orchestrator::new(backend, fast_config());
        let report = orchestrator
            .run(parts, &NarrationOptions::default(), |_, _| {})
            .await;

        assert_eq!(report.completed.len(), total);
        for (i, completed) in report.completed.iter().enumerate() {
            assert_eq!(completed.part.part_index, i);
            assert_eq!(completed.audio_ref, format!("ref://part-{}", i));
        }
    }
}
