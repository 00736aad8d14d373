//! Core trait abstractions for the trust engine.
//!
//! These traits define the collaborators the orchestrator consumes:
//! analyzers, the content extractor, and the shared state backends
//! (content cache, dedup registry, job store).

pub mod analyzer;
pub mod cache;
pub mod dedup;
pub mod extractor;
pub mod store;
