//! Error taxonomy for the narration core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a chapter's narration failed within a run.
///
/// Per-part failures are caught at the part boundary and recorded; they
/// never abort the run. The kinds are deliberately coarse so the UI layer
/// can render them without knowing provider details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The submit call itself was rejected. Indicates a malformed request,
    /// not transient unavailability; never retried within a run.
    SubmissionError,
    /// The backend explicitly reported the job as failed.
    BackendFailure,
    /// No terminal status within the polling budget.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::SubmissionError => write!(f, "submission_error"),
            FailureKind::BackendFailure => write!(f, "backend_failure"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors that abort a narration run before or outside per-part processing.
#[derive(Error, Debug)]
pub enum NarrationError {
    /// The run does not fit within the remaining monthly allowance.
    /// Raised before any backend call; the free tier (zero allowance)
    /// always lands here.
    #[error(
        "narration quota exceeded: {requested} chapter(s) requested, {used}/{limit} units used this period"
    )]
    QuotaExceeded {
        requested: u32,
        used: u32,
        limit: u32,
    },

    #[error("quota store error: {0}")]
    QuotaStore(anyhow::Error),

    #[error("failed to persist audio artifact: {0}")]
    Persistence(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NarrationError>;
