//! The analyzer contract.
//!
//! Each analysis capability (image classifier, text recognizer, claim
//! heuristics, publisher reputation) implements [`Analyzer`]. The
//! orchestrator only sees the declared [`AnalyzerSpec`] and the typed
//! [`AnalyzerResult`]; how a verdict is computed is the analyzer's business.
//!
//! # Usage
//!
//! ```rust,ignore
//! struct OcrAnalyzer { spec: AnalyzerSpec, model: Arc<dyn CapabilityProvider> }
//!
//! #[async_trait]
//! impl Analyzer for OcrAnalyzer {
//!     fn spec(&self) -> &AnalyzerSpec { &self.spec }
//!
//!     async fn run(&self, input: &AnalyzerInput) -> AnalyzerOutcome<AnalyzerResult> {
//!         if !input.content.has_media() {
//!             return Ok(AnalyzerResult::skipped("no images to read"));
//!         }
//!         // ...
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AnalyzerOutcome, Result};
use crate::types::content::ExtractedContent;
use crate::types::result::{AnalyzerPayload, AnalyzerResult};

/// Metadata the orchestrator uses to build the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSpec {
    pub name: String,
    /// Deadline per attempt; `None` uses the pipeline default
    pub timeout: Option<Duration>,
    /// Whether transient failures may be retried at all
    pub retryable: bool,
    /// Analyzer names whose results this analyzer needs as input
    pub depends_on: Vec<String>,
}

impl AnalyzerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            retryable: true,
            depends_on: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.clear();
        for name in names {
            let name = name.into();
            if !self.depends_on.contains(&name) {
                self.depends_on.push(name);
            }
        }
        self
    }

    pub fn is_dependent(&self) -> bool {
        !self.depends_on.is_empty()
    }
}

/// Input handed to an analyzer: the post plus settled upstream results.
#[derive(Debug, Clone)]
pub struct AnalyzerInput {
    pub content: Arc<ExtractedContent>,
    /// Only the analyzers named in `depends_on`, each already settled
    pub upstream: BTreeMap<String, AnalyzerResult>,
}

impl AnalyzerInput {
    pub fn new(content: Arc<ExtractedContent>) -> Self {
        Self {
            content,
            upstream: BTreeMap::new(),
        }
    }

    pub fn with_upstream(mut self, name: impl Into<String>, result: AnalyzerResult) -> Self {
        self.upstream.insert(name.into(), result);
        self
    }

    pub fn upstream(&self, name: &str) -> Option<&AnalyzerResult> {
        self.upstream.get(name)
    }

    /// Text to analyze: the combined caption + OCR text when text extraction
    /// succeeded upstream, otherwise the bare caption.
    pub fn text(&self) -> &str {
        self.upstream
            .values()
            .find_map(|r| match r.payload() {
                Some(AnalyzerPayload::TextExtraction { combined_text, .. }) => {
                    Some(combined_text.as_str())
                }
                _ => None,
            })
            .unwrap_or(self.content.caption.as_str())
    }
}

/// A heavyweight capability (model handle, API client) with explicit
/// lifecycle, injected into analyzers at construction time.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Load the model / open the connection. Called once before first use.
    async fn initialize(&self) -> Result<()>;

    /// Release resources. Called once at service shutdown.
    async fn shutdown(&self) -> Result<()>;
}

/// One analysis capability.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn spec(&self) -> &AnalyzerSpec;

    /// Produce a result for this input.
    ///
    /// Return `Ok(AnalyzerResult::Skipped { .. })` when there is nothing to
    /// analyze (e.g. no images) rather than an error.
    async fn run(&self, input: &AnalyzerInput) -> AnalyzerOutcome<AnalyzerResult>;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.spec().name
    }
}
