//! Analysis Orchestration and Trust Scoring
//!
//! Takes a reference to a social media post, drives it through a set of
//! independent analysis capabilities, and folds their verdicts into an
//! explainable trust score (0-100 with a letter grade and an ordered list
//! of adjustments).
//!
//! # Design Philosophy
//!
//! - Analyzers are collaborators behind one contract; the engine never
//!   knows how a verdict is computed
//! - One pipeline run per post at a time (single-flight dedup)
//! - Partial results beat no results: a failed analyzer reduces signal,
//!   only a failed extraction fails the job
//! - Scoring is a pure function of recorded results and a weight table
//!
//! # Usage
//!
//! ```rust,ignore
//! use trust_engine::{Backends, MemoryStore, TrustService};
//! use trust_engine::remote::{RemoteAnalyzer, RemoteExtractor};
//!
//! let store = Arc::new(MemoryStore::new());
//! let service = TrustService::builder(
//!     Arc::new(RemoteExtractor::new("http://scraper:9000")?),
//!     Backends::shared(store),
//! )
//! .with_analyzer(Arc::new(RemoteAnalyzer::new(
//!     "http://models:8080",
//!     AnalyzerSpec::new("image-authenticity"),
//! )?))
//! .build()?;
//! service.start().await?;
//!
//! let submission = service.submit("https://www.instagram.com/p/ABC123/").await?;
//! let outcome = service.wait(submission.job_id, Duration::from_secs(30)).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator contracts (Analyzer, ContentExtractor, ContentCache, DedupRegistry, JobStore)
//! - [`types`] - Content keys, jobs, analyzer results, trust scores, config
//! - [`pipeline`] - Dependency graph, analyzer executor, job orchestrator
//! - [`scoring`] - Table-driven trust score engine
//! - [`service`] - Public operations (submit, status, result, invalidate)
//! - [`metrics`] - Submission, run, cache hit and per-analyzer counters
//! - [`stores`] - Backend implementations (MemoryStore, PostgresStore)
//! - [`remote`] - HTTP-backed extractor and analyzers
//! - [`testing`] - Mock collaborators for testing

pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod remote;
pub mod scoring;
pub mod service;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    AnalyzerError, AnalyzerOutcome, ErrorKind, ExtractError, ExtractResult, JobError,
    PipelineError, Result,
};
pub use traits::{
    analyzer::{Analyzer, AnalyzerInput, AnalyzerSpec, CapabilityProvider},
    cache::{CacheNamespace, CacheStats, ContentCache},
    dedup::{Acquired, DedupRegistry},
    extractor::ContentExtractor,
    store::JobStore,
};
pub use types::{
    config::PipelineConfig,
    content::{ContentKey, ExtractedContent},
    job::{Job, JobPatch, JobState},
    result::{AnalyzerPayload, AnalyzerResult, RedFlag, VersionedPayload, PAYLOAD_SCHEMA_VERSION},
    score::{ComponentScore, Omission, ScoreAdjustment, ScoreFlag, TrustScore},
};

pub use metrics::{AnalyzerTiming, CacheCounters, MetricsSnapshot, PipelineMetrics};

// Re-export pipeline components
pub use pipeline::{execute, AnalyzerGraph, Backends, CachedAnalysis, Orchestrator};

// Re-export scoring
pub use scoring::{ComponentRule, GradeBand, ScoringConfig, ScoringRule, TrustScoreEngine};

// Re-export service operations
pub use service::{
    AnalysisReport, JobOutcome, JobStatus, Submission, TrustService, TrustServiceBuilder,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;

// Re-export remote collaborators
pub use remote::{RemoteAnalyzer, RemoteExtractor};

// Re-export testing utilities
pub use testing::{MockAnalyzer, MockCapability, MockExtractor, TestScenario};
