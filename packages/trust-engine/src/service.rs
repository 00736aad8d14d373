//! Caller-facing operations: submit, status, result, invalidate.
//!
//! `TrustService` owns the orchestrator, the bounded worker pool and the
//! per-job watch channels. It is cheap to clone; clones share everything.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(MemoryStore::new());
//! let service = TrustService::builder(extractor, Backends::shared(store))
//!     .with_analyzers(analyzers)
//!     .with_scoring(ScoringConfig::from_file("scoring.toml")?)
//!     .build()?;
//! service.start().await?;
//!
//! let submission = service.submit("https://www.instagram.com/p/ABC123/").await?;
//! let job = service.wait(submission.job_id, Duration::from_secs(60)).await?;
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, JobError, PipelineError, Result};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{AnalyzerGraph, Backends, CachedAnalysis, Orchestrator};
use crate::scoring::{ScoringConfig, TrustScoreEngine};
use crate::traits::analyzer::{Analyzer, CapabilityProvider};
use crate::traits::cache::CacheStats;
use crate::traits::extractor::ContentExtractor;
use crate::types::config::PipelineConfig;
use crate::types::content::ContentKey;
use crate::types::job::{Job, JobPatch, JobState};
use crate::types::result::AnalyzerResult;
use crate::types::score::TrustScore;

/// Polls a missing job gets before `wait` reports it as unknown.
const MISSING_JOB_POLLS: u32 = 3;

/// Returned by [`TrustService::submit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: Uuid,
    pub state: JobState,
    /// Served from the analysis cache without running any analyzer
    pub cached: bool,
    /// Attached to a run that was already in flight
    pub deduplicated: bool,
}

/// Returned by [`TrustService::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub content_key: ContentKey,
    pub state: JobState,
    pub progress: u8,
    pub message: String,
    pub cached: bool,
    pub error: Option<JobError>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        let message = match &job.error {
            Some(err) => format!("{}: {}", job.state.message(), err.message),
            None => job.state.message().to_string(),
        };
        Self {
            job_id: job.id,
            content_key: job.content_key.clone(),
            state: job.state,
            progress: job.progress,
            message,
            cached: job.cached,
            error: job.error.clone(),
            updated_at: job.updated_at,
        }
    }
}

/// A completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub job_id: Uuid,
    pub content_key: ContentKey,
    pub score: TrustScore,
    pub results: BTreeMap<String, AnalyzerResult>,
    pub cached: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Returned by [`TrustService::get_result`]. Never a partial score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    NotReady {
        job_id: Uuid,
        state: JobState,
        progress: u8,
    },
    Completed(AnalysisReport),
    Failed {
        job_id: Uuid,
        error: JobError,
    },
}

impl JobOutcome {
    fn from_job(job: Job) -> Self {
        match (job.state, job.score, job.error) {
            (JobState::Completed, Some(score), _) => JobOutcome::Completed(AnalysisReport {
                job_id: job.id,
                content_key: job.content_key,
                score,
                results: job.results,
                cached: job.cached,
                completed_at: job.completed_at,
            }),
            (JobState::Failed, _, error) => JobOutcome::Failed {
                job_id: job.id,
                error: error.unwrap_or_else(|| {
                    JobError::new(ErrorKind::Internal, "orchestrator", "failure not recorded")
                }),
            },
            (state, _, _) => JobOutcome::NotReady {
                job_id: job.id,
                state,
                progress: job.progress,
            },
        }
    }
}

struct Inner {
    orchestrator: Orchestrator,
    capabilities: Vec<Arc<dyn CapabilityProvider>>,
    permits: Arc<Semaphore>,
    watchers: DashMap<Uuid, watch::Sender<Job>>,
    cancel: CancellationToken,
    runs: TaskTracker,
}

/// The trust engine's public API.
#[derive(Clone)]
pub struct TrustService {
    inner: Arc<Inner>,
}

impl TrustService {
    pub fn builder(extractor: Arc<dyn ContentExtractor>, backends: Backends) -> TrustServiceBuilder {
        TrustServiceBuilder {
            extractor,
            backends,
            analyzers: Vec::new(),
            capabilities: Vec::new(),
            scoring: ScoringConfig::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.inner.orchestrator.config()
    }

    fn backends(&self) -> &Backends {
        self.inner.orchestrator.backends()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initialise capability providers, then analyzers.
    pub async fn start(&self) -> Result<()> {
        for capability in &self.inner.capabilities {
            capability.initialize().await?;
            debug!(capability = capability.name(), "capability initialized");
        }
        for analyzer in self.inner.orchestrator.graph().all() {
            analyzer.initialize().await?;
        }
        info!(
            analyzers = self.inner.orchestrator.graph().len(),
            max_concurrent_jobs = self.config().max_concurrent_jobs,
            "trust service started"
        );
        Ok(())
    }

    /// Stop accepting work, fail in-flight jobs, release resources.
    ///
    /// Returns once every run has recorded its terminal state and released
    /// its dedup entry. Errors from individual shutdown hooks are logged,
    /// not returned.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.permits.close();
        self.inner.runs.close();
        self.inner.runs.wait().await;

        for analyzer in self.inner.orchestrator.graph().all() {
            if let Err(e) = analyzer.shutdown().await {
                warn!(analyzer = analyzer.name(), error = %e, "analyzer shutdown failed");
            }
        }
        for capability in &self.inner.capabilities {
            if let Err(e) = capability.shutdown().await {
                warn!(capability = capability.name(), error = %e, "capability shutdown failed");
            }
        }
        info!("trust service stopped");
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Create or attach to a job for a post URL or `post:<shortcode>` key.
    ///
    /// Never waits for the analysis itself.
    pub async fn submit(&self, input: &str) -> Result<Submission> {
        let key = ContentKey::parse(input)?;
        self.submit_key(key).await
    }

    pub async fn submit_key(&self, key: ContentKey) -> Result<Submission> {
        if self.inner.cancel.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }
        let backends = self.backends();
        let metrics = self.inner.orchestrator.metrics();
        metrics.record_submitted();

        if let Some(cached) = self.inner.orchestrator.cached_analysis(&key).await {
            let job = self.complete_from_cache(&key, cached).await?;
            info!(job_id = %job.id, content_key = %key, "served from analysis cache");
            return Ok(Submission {
                job_id: job.id,
                state: job.state,
                cached: true,
                deduplicated: false,
            });
        }

        // Cheap read path: a run for this key that is visibly in flight. A run
        // this process still tracks is live even if it is queued past its lease.
        let existing = backends.jobs.find_by_content_key(&key).await?;
        if let Some(job) = &existing {
            let in_flight = !job.is_terminal()
                && (self.inner.watchers.contains_key(&job.id)
                    || backends.dedup.owner(&key).await? == Some(job.id));
            if in_flight {
                metrics.record_deduplicated();
                debug!(job_id = %job.id, content_key = %key, "attached to in-flight job");
                return Ok(Submission {
                    job_id: job.id,
                    state: job.state,
                    cached: false,
                    deduplicated: true,
                });
            }
        }

        let candidate = Job::new(Uuid::new_v4(), key.clone());
        // Registered before acquire so in-process waiters never miss the owner's channel
        let (events, _) = watch::channel(candidate.clone());
        self.inner.watchers.insert(candidate.id, events.clone());

        let acquired = match backends
            .dedup
            .acquire(&key, candidate.id, self.config().dedup_lease())
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                self.inner.watchers.remove(&candidate.id);
                return Err(e);
            }
        };

        if !acquired.is_owner {
            self.inner.watchers.remove(&candidate.id);
            let state = backends
                .jobs
                .get(acquired.job_id)
                .await?
                .map(|j| j.state)
                .unwrap_or(JobState::Pending);
            metrics.record_deduplicated();
            debug!(job_id = %acquired.job_id, content_key = %key, "lost dedup race, attaching");
            return Ok(Submission {
                job_id: acquired.job_id,
                state,
                cached: false,
                deduplicated: true,
            });
        }

        if let Some(stale) = existing {
            self.abandon_stale(stale).await;
        }

        if let Err(e) = backends.jobs.create(&candidate).await {
            self.inner.watchers.remove(&candidate.id);
            if let Err(release_err) = backends.dedup.release(&key, candidate.id).await {
                warn!(error = %release_err, "failed to release dedup entry");
            }
            return Err(e);
        }

        info!(job_id = %candidate.id, content_key = %key, "job submitted");
        self.spawn_run(candidate.id, key, events);

        Ok(Submission {
            job_id: candidate.id,
            state: JobState::Pending,
            cached: false,
            deduplicated: false,
        })
    }

    /// State, progress and status line. Safe to poll at any cadence.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatus> {
        let job = self.load(job_id).await?;
        Ok(JobStatus::from(&job))
    }

    /// The score once completed, the recorded error once failed, otherwise
    /// an explicit not-ready marker.
    pub async fn get_result(&self, job_id: Uuid) -> Result<JobOutcome> {
        Ok(JobOutcome::from_job(self.load(job_id).await?))
    }

    /// Purge both cache namespaces for a key so the next submission recomputes.
    pub async fn invalidate(&self, input: &str) -> Result<ContentKey> {
        let key = ContentKey::parse(input)?;
        self.backends().cache.invalidate(&key).await?;
        info!(content_key = %key, "cache invalidated");
        Ok(key)
    }

    /// Resolve when the job is terminal.
    ///
    /// Jobs run by this process are awaited on their watch channel; jobs
    /// owned elsewhere are polled from the job store.
    pub async fn wait(&self, job_id: Uuid, timeout: Duration) -> Result<Job> {
        let waiting = async {
            let receiver = self.inner.watchers.get(&job_id).map(|tx| tx.subscribe());
            if let Some(mut rx) = receiver {
                loop {
                    if rx.borrow_and_update().is_terminal() {
                        return Ok(rx.borrow().clone());
                    }
                    if rx.changed().await.is_err() {
                        // Run finished and dropped its channel; the store has the final state
                        break;
                    }
                }
            }
            self.poll_until_terminal(job_id).await
        };

        tokio::time::timeout(timeout, waiting)
            .await
            .map_err(|_| PipelineError::WaitTimeout(job_id))?
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.backends().cache.stats().await
    }

    /// Counters since this process started.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.orchestrator.metrics().snapshot()
    }

    /// Expiry sweep over both cache namespaces. Returns entries removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self.backends().cache.purge_expired().await?;
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(&self, job_id: Uuid) -> Result<Job> {
        self.backends()
            .jobs
            .get(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    async fn poll_until_terminal(&self, job_id: Uuid) -> Result<Job> {
        let interval = self.config().wait_poll_interval();
        let mut missing = 0;
        loop {
            match self.backends().jobs.get(job_id).await? {
                Some(job) if job.is_terminal() => return Ok(job),
                Some(_) => {}
                None => {
                    missing += 1;
                    if missing > MISSING_JOB_POLLS {
                        return Err(PipelineError::JobNotFound(job_id));
                    }
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Record a cache hit as a job that is born completed.
    async fn complete_from_cache(&self, key: &ContentKey, cached: CachedAnalysis) -> Result<Job> {
        let job = Job::new(Uuid::new_v4(), key.clone());
        let jobs = &self.backends().jobs;
        jobs.create(&job).await?;
        let patch = JobPatch {
            results: cached.results,
            ..JobPatch::complete(cached.score)
        }
        .with_cached(true);
        jobs.update(job.id, patch).await
    }

    /// Fail a job whose owner let its dedup lease lapse without finishing.
    async fn abandon_stale(&self, stale: Job) {
        if stale.is_terminal() || self.inner.watchers.contains_key(&stale.id) {
            return;
        }
        let error = JobError::new(
            ErrorKind::Overdue,
            "orchestrator",
            "run abandoned by its owner before completing",
        );
        match self.backends().jobs.update(stale.id, JobPatch::fail(error)).await {
            Ok(_) => warn!(job_id = %stale.id, "marked abandoned job as failed"),
            Err(e) => debug!(job_id = %stale.id, error = %e, "stale job already settled"),
        }
    }

    fn spawn_run(&self, job_id: Uuid, key: ContentKey, events: watch::Sender<Job>) {
        let inner = Arc::clone(&self.inner);
        self.inner.runs.spawn(async move {
            // A closed pool means shutdown; `run` observes the cancellation
            let _permit = inner.permits.clone().acquire_owned().await.ok();
            if let Err(e) = inner
                .orchestrator
                .run(job_id, &key, &events, &inner.cancel)
                .await
            {
                error!(job_id = %job_id, error = %e, "job did not reach a terminal state");
            }
            inner.watchers.remove(&job_id);
        });
    }
}

/// Assembles a [`TrustService`]; validates the analyzer graph and weight table.
pub struct TrustServiceBuilder {
    extractor: Arc<dyn ContentExtractor>,
    backends: Backends,
    analyzers: Vec<Arc<dyn Analyzer>>,
    capabilities: Vec<Arc<dyn CapabilityProvider>>,
    scoring: ScoringConfig,
    config: PipelineConfig,
}

impl TrustServiceBuilder {
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn with_analyzers(mut self, analyzers: impl IntoIterator<Item = Arc<dyn Analyzer>>) -> Self {
        self.analyzers.extend(analyzers);
        self
    }

    pub fn with_capability(mut self, capability: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<TrustService> {
        self.scoring.validate()?;
        for component in &self.scoring.components {
            if !self.analyzers.iter().any(|a| a.name() == component.analyzer) {
                warn!(
                    analyzer = %component.analyzer,
                    "scoring rule has no registered analyzer and will always be omitted"
                );
            }
        }

        let graph = AnalyzerGraph::new(self.analyzers)?;
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let orchestrator = Orchestrator::new(graph, self.extractor, self.backends)
            .with_engine(TrustScoreEngine::new(self.scoring))
            .with_config(self.config);

        Ok(TrustService {
            inner: Arc::new(Inner {
                orchestrator,
                capabilities: self.capabilities,
                permits,
                watchers: DashMap::new(),
                cancel: CancellationToken::new(),
                runs: TaskTracker::new(),
            }),
        })
    }
}
