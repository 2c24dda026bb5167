//! Long-form narration core for multi-chapter manuscripts.
//!
//! Converts chapters into narrated audio through an asynchronous speech
//! provider that imposes a hard per-request character limit. The pipeline:
//! normalize chapter markup, segment oversized text at paragraph and
//! sentence boundaries, gate the batch against a tiered monthly quota,
//! drive one narration job per part to a terminal state under a bounded
//! polling budget, and fold completed parts back into a chapter-level
//! audiobook manifest.
//!
//! The surrounding application supplies the collaborators behind trait
//! seams: a [`speech::SpeechBackend`], a [`quota::QuotaStore`], and an
//! [`engine::ArtifactStore`]. Everything else (editing, persistence,
//! billing, UI) stays outside this crate.

pub mod assembler;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod quota;
pub mod speech;
pub mod text;

pub use assembler::{assemble, AudiobookManifest, ManifestEntry};
pub use config::EngineConfig;
pub use engine::{ArtifactStore, Chapter, MemoryArtifactStore, NarrationEngine, RunOutcome};
pub use error::{FailureKind, NarrationError};
pub use orchestrator::{
    ChapterFailure, CompletedPart, JobState, NarrationJob, Orchestrator, RunReport,
};
pub use quota::{MemoryQuotaStore, QuotaLedger, QuotaState, QuotaStore, ReserveOutcome, Tier};
pub use speech::{
    BackendStatus, JobHandle, NarrationOptions, PollResponse, Quality, ScriptedBackend,
    SpeechBackend, SubmitRequest,
};
pub use text::{normalize, segment, NarrationPart};
