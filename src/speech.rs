//! Speech backend seam.
//!
//! The provider is an opaque capability: it accepts bounded text and
//! eventually reports either a storage reference or a failure. Everything
//! behind the trait (transport, auth, voice models) is out of scope.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Audio quality requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Standard,
    Premium,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Standard
    }
}

/// Voice and quality settings for a narration run.
#[derive(Debug, Clone)]
pub struct NarrationOptions {
    /// Provider voice identifier.
    pub voice: String,
    /// Requested audio quality.
    pub quality: Quality,
}

impl Default for NarrationOptions {
    fn default() -> Self {
        Self {
            voice: "narrator-1".to_string(),
            quality: Quality::Standard,
        }
    }
}

impl NarrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// One narration submission, sized to fit the provider ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
    pub voice: String,
    pub quality: Quality,
    pub chapter_id: String,
    pub part_title: String,
}

/// Handle returned by a successful submission, used for status polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub chapter_id: String,
}

/// Provider-reported job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// One status poll observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: BackendStatus,
    /// Storage reference for the finished audio, present once completed.
    pub audio_ref: Option<String>,
    /// Provider-reported error, present once failed.
    pub error: Option<String>,
}

impl PollResponse {
    pub fn queued() -> Self {
        Self {
            status: BackendStatus::Queued,
            audio_ref: None,
            error: None,
        }
    }

    pub fn processing() -> Self {
        Self {
            status: BackendStatus::Processing,
            audio_ref: None,
            error: None,
        }
    }

    pub fn completed(audio_ref: impl Into<String>) -> Self {
        Self {
            status: BackendStatus::Completed,
            audio_ref: Some(audio_ref.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: BackendStatus::Failed,
            audio_ref: None,
            error: Some(error.into()),
        }
    }
}

/// Asynchronous narration provider.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Submit one part for narration. An error here means the request
    /// itself was rejected (malformed), not that the provider is busy.
    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle>;

    /// Poll a submitted job once.
    async fn poll(&self, handle: &JobHandle) -> Result<PollResponse>;
}

/// What the scripted backend should do for one submission.
#[derive(Debug, Clone)]
enum SubmitScript {
    /// Reject the submission outright.
    Reject(String),
    /// Accept and serve the given poll observations in order; the last
    /// one repeats once the script is exhausted.
    Accept(Vec<PollResponse>),
}

/// A scripted backend for testing orchestration behavior.
///
/// Scripts are consumed in submission order, which matches the
/// orchestrator's strictly sequential processing.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<SubmitScript>>,
    jobs: Mutex<HashMap<String, VecDeque<PollResponse>>>,
    submit_count: AtomicUsize,
    poll_count: AtomicUsize,
    next_job: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next submission is rejected with the given message.
    pub fn push_reject(&self, message: impl Into<String>) {
        self.push(SubmitScript::Reject(message.into()));
    }

    /// Next submission processes once, then completes with `audio_ref`.
    pub fn push_success(&self, audio_ref: impl Into<String>) {
        self.push(SubmitScript::Accept(vec![
            PollResponse::processing(),
            PollResponse::completed(audio_ref),
        ]));
    }

    /// Next submission processes once, then fails with `error`.
    pub fn push_failure(&self, error: impl Into<String>) {
        self.push(SubmitScript::Accept(vec![
            PollResponse::processing(),
            PollResponse::failed(error),
        ]));
    }

    /// Next submission never reaches a terminal status.
    pub fn push_never_completes(&self) {
        self.push(SubmitScript::Accept(vec![PollResponse::processing()]));
    }

    /// Next submission serves an explicit poll sequence.
    pub fn push_polls(&self, polls: Vec<PollResponse>) {
        self.push(SubmitScript::Accept(polls));
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    fn push(&self, script: SubmitScript) {
        self.scripts.lock().unwrap().push_back(script);
    }
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| SubmitScript::Accept(vec![PollResponse::completed("ref://default")]));

        match script {
            SubmitScript::Reject(message) => Err(anyhow::anyhow!(message)),
            SubmitScript::Accept(polls) => {
                let job_id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
                self.jobs
                    .lock()
                    .unwrap()
                    .insert(job_id.clone(), polls.into());
                Ok(JobHandle {
                    job_id,
                    chapter_id: request.chapter_id.clone(),
                })
            }
        }
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollResponse> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);

        let mut jobs = self.jobs.lock().unwrap();
        let polls = jobs
            .get_mut(&handle.job_id)
            .ok_or_else(|| anyhow::anyhow!("unknown job: {}", handle.job_id))?;

        if polls.len() > 1 {
            Ok(polls.pop_front().unwrap_or_else(PollResponse::queued))
        } else {
            // Keep serving the final observation.
            Ok(polls.front().cloned().unwrap_or_else(PollResponse::queued))
        }
    }
}
