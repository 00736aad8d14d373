//! Analysis pipeline - the core of the engine.
//!
//! The pipeline orchestrates:
//! - Dependency graph validation (independent vs dependent analyzers)
//! - Per-analyzer execution with deadline and bounded retry
//! - Job state machine driving (extract → analyze → score → complete)
//! - Cache population and dedup release on terminal transition

pub mod executor;
pub mod graph;
pub mod orchestrator;

pub use executor::execute;
pub use graph::AnalyzerGraph;
pub use orchestrator::{Backends, CachedAnalysis, Orchestrator};
