//! Typed errors for the trust engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Failures that belong
//! to a job (an extraction that failed, an analyzer that timed out) are not
//! Rust errors at all: they are recorded on the job as [`JobError`] or as an
//! [`AnalyzerResult::Failure`](crate::types::result::AnalyzerResult) and
//! surfaced to callers verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The submitted content reference could not be normalised
    #[error("invalid content key: {reason}")]
    Validation { reason: String },

    /// No job with this id exists
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// A terminal job was asked to change, or a result slot was written twice
    #[error("illegal job update for {job_id}: {reason}")]
    IllegalUpdate { job_id: Uuid, reason: String },

    /// Storage backend failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is inconsistent (bad analyzer graph, unreadable weight table)
    #[error("config error: {0}")]
    Config(String),

    /// Waiting for a job exceeded the caller's timeout
    #[error("timed out waiting for job {0}")]
    WaitTimeout(Uuid),

    /// The service is shutting down
    #[error("service is shutting down")]
    ShuttingDown,
}

impl PipelineError {
    pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(e))
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

/// Error raised by an analyzer collaborator for one invocation.
#[derive(Debug, Clone, Error)]
pub enum AnalyzerError {
    /// Transient failure; the executor may retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// Permanent failure; recorded immediately
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Payload did not match the declared schema
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl AnalyzerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalyzerError::Transient(_))
    }
}

/// Error raised by the content extraction collaborator.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The post does not exist or is not accessible
    #[error("content unavailable: {0}")]
    Unavailable(String),

    /// Upstream platform or network failure
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Response could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::Upstream(_))
    }
}

/// Failure taxonomy shared by jobs and analyzer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No content to analyze; fatal to the job
    ExtractionFailure,
    /// One analyzer failed; reduces signal, never fatal
    AnalyzerFailure,
    /// One analyzer exceeded its own deadline
    Timeout,
    /// The whole job exceeded its overall deadline; fatal
    Overdue,
    /// Every analyzer was absent; a flagged completion, not a failure
    ScoringInputInsufficient,
    /// The content key was rejected before a job existed
    ValidationFailure,
    /// Storage or other infrastructure failure that stopped the pipeline
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::AnalyzerFailure => "analyzer_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Overdue => "overdue",
            ErrorKind::ScoringInputInsufficient => "scoring_input_insufficient",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failure recorded on a job when it transitions to `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Component that raised the failure (e.g. "extractor", "orchestrator")
    pub component: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component: component.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}: {}", self.kind, self.component, self.message)
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for analyzer invocations.
pub type AnalyzerOutcome<T> = std::result::Result<T, AnalyzerError>;

/// Result type alias for extraction calls.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;
