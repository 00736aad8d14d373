//! Drives one job from `Pending` to a terminal state.
//!
//! ```text
//! extract ──► independent analyzers (concurrent) ──┐
//!                   │ text-extraction settles        ├─► score ─► complete ─► cache ─► release
//!                   └──► dependent analyzers ────────┘
//! ```
//!
//! Dependent analyzers start as soon as their own dependencies settle, not
//! when the whole independent group does. Every state change goes through
//! the [`JobStore`] and is then published on the job's watch channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::executor;
use super::graph::AnalyzerGraph;
use crate::error::{ErrorKind, ExtractResult, JobError, PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::scoring::TrustScoreEngine;
use crate::traits::analyzer::{Analyzer, AnalyzerInput};
use crate::traits::cache::{CacheNamespace, ContentCache};
use crate::traits::dedup::DedupRegistry;
use crate::traits::extractor::ContentExtractor;
use crate::traits::store::JobStore;
use crate::types::config::PipelineConfig;
use crate::types::content::{ContentKey, ExtractedContent};
use crate::types::job::{Job, JobPatch, JobState};
use crate::types::result::AnalyzerResult;
use crate::types::score::TrustScore;

/// Shared state backends.
///
/// Usually one store implements all three; they are separate so a
/// deployment can, for example, keep the cache in a different database.
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn ContentCache>,
    pub dedup: Arc<dyn DedupRegistry>,
    pub jobs: Arc<dyn JobStore>,
}

impl Backends {
    /// Use a single store for cache, dedup and jobs.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ContentCache + DedupRegistry + JobStore + 'static,
    {
        Self {
            cache: store.clone(),
            dedup: store.clone(),
            jobs: store,
        }
    }
}

/// Entry stored in the analysis cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    /// The job that computed this analysis
    pub job_id: Uuid,
    pub score: TrustScore,
    pub results: BTreeMap<String, AnalyzerResult>,
    pub analyzed_at: DateTime<Utc>,
}

/// Settle the slot of an analyzer task that ended without returning.
///
/// The executor catches panics, so this is an external abort.
fn aborted_slot(
    names: &mut HashMap<task::Id, String>,
    e: &JoinError,
) -> Option<(String, AnalyzerResult)> {
    let name = names.remove(&e.id())?;
    error!(analyzer = %name, error = %e, "analyzer task aborted");
    let result = AnalyzerResult::failure(
        ErrorKind::AnalyzerFailure,
        format!("analyzer task aborted: {e}"),
    );
    Some((name, result))
}

/// Executes jobs against a validated analyzer graph.
pub struct Orchestrator {
    graph: AnalyzerGraph,
    extractor: Arc<dyn ContentExtractor>,
    backends: Backends,
    engine: TrustScoreEngine,
    config: Arc<PipelineConfig>,
    metrics: Arc<PipelineMetrics>,
}

impl Orchestrator {
    pub fn new(graph: AnalyzerGraph, extractor: Arc<dyn ContentExtractor>, backends: Backends) -> Self {
        Self {
            graph,
            extractor,
            backends,
            engine: TrustScoreEngine::default(),
            config: Arc::new(PipelineConfig::default()),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn with_engine(mut self, engine: TrustScoreEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn graph(&self) -> &AnalyzerGraph {
        &self.graph
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Live analysis-cache entry for `key`, if any.
    ///
    /// An unreadable or undecodable entry counts as a miss.
    pub async fn cached_analysis(&self, key: &ContentKey) -> Option<CachedAnalysis> {
        let cached = self.read_cached_analysis(key).await;
        self.metrics
            .record_cache_lookup(CacheNamespace::Analysis, cached.is_some());
        cached
    }

    async fn read_cached_analysis(&self, key: &ContentKey) -> Option<CachedAnalysis> {
        match self.backends.cache.get(key, CacheNamespace::Analysis).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(cached) => Some(cached),
                Err(e) => {
                    warn!(content_key = %key, error = %e, "discarding undecodable analysis cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(content_key = %key, error = %e, "analysis cache unavailable");
                None
            }
        }
    }

    /// Run a job to completion and release its dedup entry.
    ///
    /// The job must already exist in `Pending`. Whatever happens, the job
    /// ends terminal: the overall deadline turns into `Overdue`, storage
    /// errors into `Internal`, and cancellation into `Internal` as well.
    #[instrument(skip(self, key, events, cancel), fields(job_id = %job_id, content_key = %key))]
    pub async fn run(
        &self,
        job_id: Uuid,
        key: &ContentKey,
        events: &watch::Sender<Job>,
        cancel: &CancellationToken,
    ) -> Result<Job> {
        let deadline = self.config.job_deadline();
        let started = Instant::now();

        // The lease was taken at submit; a job queued for a worker must not lose it
        match self
            .backends
            .dedup
            .renew(key, job_id, self.config.dedup_lease())
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("dedup entry no longer owned by this job"),
            Err(e) => warn!(error = %e, "failed to renew dedup lease"),
        }

        let driven = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(deadline, self.drive(job_id, key, events)) => Some(r),
        };

        let job = match driven {
            Some(Ok(Ok(job))) => Ok(job),
            Some(Ok(Err(e))) => {
                error!(error = %e, "pipeline aborted");
                self.fail(
                    job_id,
                    JobError::new(ErrorKind::Internal, "orchestrator", e.to_string()),
                    events,
                )
                .await
            }
            Some(Err(_elapsed)) => {
                // Dropping the drive future aborted any analyzer still running
                warn!(deadline_ms = deadline.as_millis() as u64, "job overdue");
                self.fail(
                    job_id,
                    JobError::new(
                        ErrorKind::Overdue,
                        "orchestrator",
                        format!("job exceeded its {}ms deadline", deadline.as_millis()),
                    ),
                    events,
                )
                .await
            }
            None => {
                info!("job cancelled by shutdown");
                self.fail(
                    job_id,
                    JobError::new(ErrorKind::Internal, "orchestrator", "service shutting down"),
                    events,
                )
                .await
            }
        };

        let completed = matches!(&job, Ok(j) if j.state == JobState::Completed);
        self.metrics.record_run(completed, started.elapsed());

        if let Err(e) = self.backends.dedup.release(key, job_id).await {
            warn!(error = %e, "failed to release dedup entry, lease will expire");
        }
        job
    }

    async fn drive(&self, job_id: Uuid, key: &ContentKey, events: &watch::Sender<Job>) -> Result<Job> {
        self.update(job_id, JobPatch::transition(JobState::Extracting), events)
            .await?;

        let content = match self.load_content(key).await {
            Ok(content) => Arc::new(content),
            Err(e) => {
                warn!(error = %e, "extraction failed");
                return self
                    .fail(
                        job_id,
                        JobError::new(ErrorKind::ExtractionFailure, "extractor", e.to_string()),
                        events,
                    )
                    .await;
            }
        };

        self.update(job_id, JobPatch::transition(JobState::AnalyzingParallel), events)
            .await?;
        let results = self.run_analyzers(job_id, content, events).await?;

        self.update(job_id, JobPatch::transition(JobState::Scoring), events)
            .await?;
        let score = self.engine.compute(&results);
        info!(
            score = score.score,
            grade = %score.grade,
            flags = score.flags.len(),
            "job scored"
        );
        let job = self
            .update(job_id, JobPatch::complete(score.clone()), events)
            .await?;

        let cached = CachedAnalysis {
            job_id,
            score,
            results,
            analyzed_at: Utc::now(),
        };
        self.cache_put(key, CacheNamespace::Analysis, &cached).await;

        Ok(job)
    }

    /// Extracted content from the short-TTL cache, else from the extractor.
    ///
    /// Upstream failures are retried with the analyzer backoff policy; any
    /// other extraction error is final.
    async fn load_content(&self, key: &ContentKey) -> ExtractResult<ExtractedContent> {
        match self.backends.cache.get(key, CacheNamespace::Extracted).await {
            Ok(Some(value)) => match serde_json::from_value::<ExtractedContent>(value) {
                Ok(content) => {
                    debug!("extracted content served from cache");
                    self.metrics
                        .record_cache_lookup(CacheNamespace::Extracted, true);
                    return Ok(content);
                }
                Err(e) => warn!(error = %e, "discarding undecodable extracted-content entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "extracted-content cache unavailable"),
        }

        self.metrics
            .record_cache_lookup(CacheNamespace::Extracted, false);

        let mut attempt: u32 = 0;
        let content = loop {
            match self.extractor.extract(key).await {
                Ok(content) => break content,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff_for(attempt);
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "extraction failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.cache_put(key, CacheNamespace::Extracted, &content).await;
        Ok(content)
    }

    async fn run_analyzers(
        &self,
        job_id: Uuid,
        content: Arc<ExtractedContent>,
        events: &watch::Sender<Job>,
    ) -> Result<BTreeMap<String, AnalyzerResult>> {
        let total = self.graph.len();
        let mut settled: BTreeMap<String, AnalyzerResult> = BTreeMap::new();
        let mut waiting: HashMap<&str, usize> = self
            .graph
            .dependent()
            .map(|a| (a.name(), a.spec().depends_on.len()))
            .collect();
        let mut independent_left = self.graph.independent().count();
        let mut in_dependent_stage = false;
        let mut tasks = JoinSet::new();
        let mut names: HashMap<task::Id, String> = HashMap::new();

        for analyzer in self.graph.independent() {
            self.dispatch(
                &mut tasks,
                &mut names,
                Arc::clone(analyzer),
                AnalyzerInput::new(Arc::clone(&content)),
            );
        }

        if independent_left == 0 {
            self.update(job_id, JobPatch::transition(JobState::AnalyzingDependent), events)
                .await?;
            in_dependent_stage = true;
        }

        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => match aborted_slot(&mut names, &e) {
                    Some(pair) => pair,
                    None => {
                        error!(error = %e, "unknown analyzer task aborted");
                        continue;
                    }
                },
            };

            let progress = 30 + (40 * (settled.len() + 1) / total.max(1)) as u8;
            self.update(
                job_id,
                JobPatch::result(name.clone(), result.clone()).with_progress(progress),
                events,
            )
            .await?;
            self.metrics.record_analyzer(&name, &result);
            settled.insert(name.clone(), result);

            for dependent in self.graph.dependents_of(&name) {
                let Some(left) = waiting.get_mut(dependent) else {
                    continue;
                };
                *left -= 1;
                if *left > 0 {
                    continue;
                }
                if let Some(analyzer) = self.graph.get(dependent) {
                    let input = analyzer.spec().depends_on.iter().fold(
                        AnalyzerInput::new(Arc::clone(&content)),
                        |input, dep| match settled.get(dep) {
                            Some(r) => input.with_upstream(dep.clone(), r.clone()),
                            None => input,
                        },
                    );
                    debug!(analyzer = dependent, "dependencies settled, dispatching");
                    self.dispatch(&mut tasks, &mut names, Arc::clone(analyzer), input);
                }
            }

            let was_independent = self
                .graph
                .get(&name)
                .is_some_and(|a| !a.spec().is_dependent());
            if was_independent {
                independent_left -= 1;
                if independent_left == 0 {
                    self.update(job_id, JobPatch::transition(JobState::AnalyzingDependent), events)
                        .await?;
                    in_dependent_stage = true;
                }
            }
        }

        if !in_dependent_stage {
            self.update(job_id, JobPatch::transition(JobState::AnalyzingDependent), events)
                .await?;
        }
        Ok(settled)
    }

    fn dispatch(
        &self,
        tasks: &mut JoinSet<(String, AnalyzerResult)>,
        names: &mut HashMap<task::Id, String>,
        analyzer: Arc<dyn Analyzer>,
        input: AnalyzerInput,
    ) {
        let config = Arc::clone(&self.config);
        let name = analyzer.name().to_string();
        let handle = tasks.spawn(
            async move {
                let result = executor::execute(analyzer.as_ref(), &input, &config).await;
                (analyzer.name().to_string(), result)
            }
            .in_current_span(),
        );
        names.insert(handle.id(), name);
    }

    async fn update(&self, job_id: Uuid, patch: JobPatch, events: &watch::Sender<Job>) -> Result<Job> {
        let job = self.backends.jobs.update(job_id, patch).await?;
        debug!(state = job.state.as_str(), progress = job.progress, "job updated");
        events.send_replace(job.clone());
        Ok(job)
    }

    /// Move the job to `Failed`; a job that is already terminal is returned as is.
    async fn fail(&self, job_id: Uuid, error: JobError, events: &watch::Sender<Job>) -> Result<Job> {
        match self.update(job_id, JobPatch::fail(error), events).await {
            Ok(job) => Ok(job),
            Err(PipelineError::IllegalUpdate { .. }) => self
                .backends
                .jobs
                .get(job_id)
                .await?
                .ok_or(PipelineError::JobNotFound(job_id)),
            Err(e) => Err(e),
        }
    }

    async fn cache_put<T: Serialize>(&self, key: &ContentKey, ns: CacheNamespace, value: &T) {
        let ttl = match ns {
            CacheNamespace::Extracted => self.config.extracted_ttl(),
            CacheNamespace::Analysis => self.config.analysis_ttl(),
        };
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(namespace = ns.as_str(), error = %e, "could not encode cache entry");
                return;
            }
        };
        if let Err(e) = self.backends.cache.put(key, ns, payload, ttl).await {
            warn!(namespace = ns.as_str(), error = %e, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_aborted_task_settles_its_slot_as_failure() {
        let mut tasks: JoinSet<(String, AnalyzerResult)> = JoinSet::new();
        let mut names = HashMap::new();
        let handle = tasks.spawn(std::future::pending());
        names.insert(handle.id(), "image-authenticity".to_string());
        handle.abort();

        let Some(Err(e)) = tasks.join_next().await else {
            panic!("expected an aborted task");
        };
        let (name, result) = aborted_slot(&mut names, &e).unwrap();

        assert_eq!(name, "image-authenticity");
        assert!(matches!(
            result,
            AnalyzerResult::Failure {
                kind: ErrorKind::AnalyzerFailure,
                ..
            }
        ));
        assert!(names.is_empty());
        assert!(aborted_slot(&mut names, &e).is_none());
    }
}
