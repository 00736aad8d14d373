//! Job model and its state machine.
//!
//! ```text
//! Pending ──(cache hit)──────────────────────────────────────────► Completed
//! Pending ─► Extracting ─► AnalyzingParallel ─► AnalyzingDependent ─► Scoring ─► Completed
//!    └───────────┴──────────────┴────────(fatal)───────┴────────────────┴──► Failed
//! ```
//!
//! Every mutation goes through [`Job::apply`], which is the single place the
//! invariants are enforced: terminal jobs never change, progress never goes
//! down, and an analyzer slot is written at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{JobError, PipelineError, Result};
use crate::types::content::ContentKey;
use crate::types::result::AnalyzerResult;
use crate::types::score::TrustScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Extracting,
    AnalyzingParallel,
    AnalyzingDependent,
    Scoring,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Progress floor for a state; progress is a step function over stages.
    pub fn progress(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Extracting => 10,
            JobState::AnalyzingParallel => 30,
            JobState::AnalyzingDependent => 50,
            JobState::Scoring => 70,
            JobState::Completed => 100,
            // Failed keeps whatever progress was reached
            JobState::Failed => 0,
        }
    }

    /// Human-readable status line for pollers.
    pub fn message(&self) -> &'static str {
        match self {
            JobState::Pending => "Analysis queued",
            JobState::Extracting => "Fetching post content",
            JobState::AnalyzingParallel => "Analyzing media",
            JobState::AnalyzingDependent => "Checking claims and sources",
            JobState::Scoring => "Calculating trust score",
            JobState::Completed => "Analysis complete",
            JobState::Failed => "Analysis failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, Completed) | (Pending, Extracting) => true,
            (Extracting, AnalyzingParallel) => true,
            (AnalyzingParallel, AnalyzingDependent) => true,
            (AnalyzingDependent, Scoring) => true,
            (Scoring, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Extracting => "extracting",
            JobState::AnalyzingParallel => "analyzing_parallel",
            JobState::AnalyzingDependent => "analyzing_dependent",
            JobState::Scoring => "scoring",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => JobState::Pending,
            "extracting" => JobState::Extracting,
            "analyzing_parallel" => JobState::AnalyzingParallel,
            "analyzing_dependent" => JobState::AnalyzingDependent,
            "scoring" => JobState::Scoring,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            other => return Err(PipelineError::Config(format!("unknown job state: {other}"))),
        })
    }
}

/// One pipeline run for one content key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub content_key: ContentKey,
    pub state: JobState,
    /// 0..=100, non-decreasing
    pub progress: u8,
    /// Analyzer name → settled result; each slot written at most once
    pub results: BTreeMap<String, AnalyzerResult>,
    /// Populated only on transition to `Completed`
    pub score: Option<TrustScore>,
    /// Populated only on transition to `Failed`
    pub error: Option<JobError>,
    /// True when the result was served from the analysis cache
    pub cached: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, content_key: ContentKey) -> Self {
        let now = Utc::now();
        Self {
            id,
            content_key,
            state: JobState::Pending,
            progress: 0,
            results: BTreeMap::new(),
            score: None,
            error: None,
            cached: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a patch, enforcing the job invariants.
    pub fn apply(&mut self, patch: JobPatch) -> Result<()> {
        if self.is_terminal() {
            return Err(self.illegal(format!("job is terminal ({})", self.state.as_str())));
        }

        // Validate everything before mutating so a rejected patch leaves no trace
        if let Some(next) = patch.state {
            if next != self.state && !self.state.can_transition_to(next) {
                return Err(self.illegal(format!(
                    "cannot transition {} -> {}",
                    self.state.as_str(),
                    next.as_str()
                )));
            }
            if next == JobState::Completed && patch.score.is_none() && self.score.is_none() {
                return Err(self.illegal("completion requires a score"));
            }
            if next == JobState::Failed && patch.error.is_none() {
                return Err(self.illegal("failure requires an error"));
            }
        }
        if patch.score.is_some() && patch.state != Some(JobState::Completed) {
            return Err(self.illegal("score is only written on completion"));
        }
        if patch.error.is_some() && patch.state != Some(JobState::Failed) {
            return Err(self.illegal("error is only written on failure"));
        }
        for name in patch.results.keys() {
            if self.results.contains_key(name) {
                return Err(self.illegal(format!("result slot '{name}' already written")));
            }
        }

        self.results.extend(patch.results);

        if let Some(next) = patch.state {
            self.state = next;
            if next != JobState::Failed {
                self.progress = self.progress.max(next.progress());
            }
            if next.is_terminal() {
                self.completed_at = Some(Utc::now());
            }
        }
        if let Some(progress) = patch.progress {
            // Only Completed may report 100
            let ceiling = if self.state == JobState::Completed { 100 } else { 99 };
            self.progress = self.progress.max(progress.min(ceiling));
        }
        if let Some(score) = patch.score {
            self.score = Some(score);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(cached) = patch.cached {
            self.cached = cached;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn illegal(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::IllegalUpdate {
            job_id: self.id,
            reason: reason.into(),
        }
    }
}

/// A partial update to a job, applied atomically by the Job Store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub progress: Option<u8>,
    #[serde(default)]
    pub results: BTreeMap<String, AnalyzerResult>,
    pub score: Option<TrustScore>,
    pub error: Option<JobError>,
    pub cached: Option<bool>,
}

impl JobPatch {
    pub fn transition(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn result(name: impl Into<String>, result: AnalyzerResult) -> Self {
        let mut results = BTreeMap::new();
        results.insert(name.into(), result);
        Self {
            results,
            ..Default::default()
        }
    }

    pub fn complete(score: TrustScore) -> Self {
        Self {
            state: Some(JobState::Completed),
            score: Some(score),
            ..Default::default()
        }
    }

    pub fn fail(error: JobError) -> Self {
        Self {
            state: Some(JobState::Failed),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }
}
