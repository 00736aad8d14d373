//! Pipeline counters.
//!
//! Lock-free counters updated on the hot path and read as a
//! [`MetricsSnapshot`]. Counts are per process; they reset on restart.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::traits::cache::CacheNamespace;
use crate::types::result::AnalyzerResult;

#[derive(Debug, Default)]
struct HitCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounter {
    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheCounters {
        CacheCounters::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Default)]
struct AnalyzerCounter {
    runs: AtomicU64,
    failures: AtomicU64,
    total_ms: AtomicU64,
}

/// Counters shared by the orchestrator and the service.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Accepted submissions, whatever path they took
    submitted: AtomicU64,
    /// Submissions attached to a run already in flight
    deduplicated: AtomicU64,
    /// Pipeline runs that reached `Completed`
    completed: AtomicU64,
    /// Pipeline runs that reached `Failed`
    failed: AtomicU64,
    /// Wall time of runs that reached a terminal state
    run_ms: AtomicU64,
    analysis_cache: HitCounter,
    extracted_cache: HitCounter,
    analyzers: DashMap<String, AnalyzerCounter>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, ns: CacheNamespace, hit: bool) {
        match ns {
            CacheNamespace::Analysis => self.analysis_cache.record(hit),
            CacheNamespace::Extracted => self.extracted_cache.record(hit),
        }
    }

    /// A run ended; `completed` is false for any failure.
    pub fn record_run(&self, completed: bool, elapsed: Duration) {
        let counter = if completed { &self.completed } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
        self.run_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_analyzer(&self, name: &str, result: &AnalyzerResult) {
        let counter = self.analyzers.entry(name.to_string()).or_default();
        counter.runs.fetch_add(1, Ordering::Relaxed);
        if matches!(result, AnalyzerResult::Failure { .. }) {
            counter.failures.fetch_add(1, Ordering::Relaxed);
        }
        counter
            .total_ms
            .fetch_add(result.duration_ms(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let analyzers = self
            .analyzers
            .iter()
            .map(|entry| {
                let c = entry.value();
                let timing = AnalyzerTiming::new(
                    c.runs.load(Ordering::Relaxed),
                    c.failures.load(Ordering::Relaxed),
                    c.total_ms.load(Ordering::Relaxed),
                );
                (entry.key().clone(), timing)
            })
            .collect();

        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            completed,
            failed,
            mean_run_ms: mean(self.run_ms.load(Ordering::Relaxed), completed + failed),
            analysis_cache: self.analysis_cache.snapshot(),
            extracted_cache: self.extracted_cache.snapshot(),
            analyzers,
        }
    }
}

fn mean(total: u64, count: u64) -> Option<f64> {
    (count > 0).then(|| total as f64 / count as f64)
}

/// Point-in-time view of [`PipelineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: u64,
    pub mean_run_ms: Option<f64>,
    pub analysis_cache: CacheCounters,
    pub extracted_cache: CacheCounters,
    pub analyzers: BTreeMap<String, AnalyzerTiming>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit, two decimals; 0 with no lookups
    pub hit_rate: f64,
}

impl CacheCounters {
    pub fn new(hits: u64, misses: u64) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (hits as f64 / lookups as f64 * 10_000.0).round() / 100.0
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerTiming {
    pub runs: u64,
    pub failures: u64,
    pub mean_ms: Option<f64>,
}

impl AnalyzerTiming {
    fn new(runs: u64, failures: u64, total_ms: u64) -> Self {
        Self {
            runs,
            failures,
            mean_ms: mean(total_ms, runs),
        }
    }
}
