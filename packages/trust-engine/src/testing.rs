//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the trust engine
//! without calling the source platform or real analysis models.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{AnalyzerError, AnalyzerOutcome, ExtractError, ExtractResult, PipelineError, Result};
use crate::pipeline::Backends;
use crate::service::{TrustService, TrustServiceBuilder};
use crate::stores::MemoryStore;
use crate::traits::analyzer::{Analyzer, AnalyzerInput, AnalyzerSpec, CapabilityProvider};
use crate::traits::extractor::ContentExtractor;
use crate::types::config::PipelineConfig;
use crate::types::content::{ContentKey, ExtractedContent};
use crate::types::result::{AnalyzerPayload, AnalyzerResult};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock content extractor.
///
/// Unknown keys get a generated post with a caption and one image, so most
/// tests never need to script content.
#[derive(Default)]
pub struct MockExtractor {
    contents: Mutex<HashMap<ContentKey, ExtractedContent>>,
    failures: Mutex<HashMap<ContentKey, VecDeque<ExtractError>>>,
    fail_all: Mutex<Option<ExtractError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this content for its key.
    pub fn with_content(self, content: ExtractedContent) -> Self {
        lock(&self.contents).insert(content.content_key.clone(), content);
        self
    }

    /// Fail the next extraction of `key` with `error`. Queue several to fail repeatedly.
    pub fn with_failure(self, key: &ContentKey, error: ExtractError) -> Self {
        lock(&self.failures)
            .entry(key.clone())
            .or_default()
            .push_back(error);
        self
    }

    /// Fail every extraction.
    pub fn failing(self, error: ExtractError) -> Self {
        *lock(&self.fail_all) = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn generated(key: &ContentKey) -> ExtractedContent {
        ExtractedContent::new(key.clone(), "photo")
            .with_caption(format!("Sample caption for {}", key.shortcode()))
            .with_images([format!("https://cdn.example.com/{}.jpg", key.shortcode())])
            .with_author("sample_author")
    }
}

#[async_trait]
impl ContentExtractor for MockExtractor {
    async fn extract(&self, key: &ContentKey) -> ExtractResult<ExtractedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = lock(&self.fail_all).clone() {
            return Err(error);
        }
        if let Some(error) = lock(&self.failures).get_mut(key).and_then(|q| q.pop_front()) {
            return Err(error);
        }

        Ok(lock(&self.contents)
            .get(key)
            .cloned()
            .unwrap_or_else(|| Self::generated(key)))
    }
}

/// A mock analyzer with a scripted sequence of outcomes.
///
/// Each call consumes the next scripted outcome; once the script runs out
/// the last outcome repeats. An empty script yields `Skipped`.
pub struct MockAnalyzer {
    spec: AnalyzerSpec,
    script: Mutex<VecDeque<AnalyzerOutcome<AnalyzerResult>>>,
    last: Mutex<Option<AnalyzerOutcome<AnalyzerResult>>>,
    delay: Option<Duration>,
    capability: Option<Arc<dyn CapabilityProvider>>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<AnalyzerInput>>,
}

impl MockAnalyzer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: AnalyzerSpec::new(name),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            delay: None,
            capability: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dependencies(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.spec = self.spec.depends_on(names);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.spec = self.spec.with_timeout(timeout);
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.spec = self.spec.non_retryable();
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_result(self, result: AnalyzerResult) -> Self {
        lock(&self.script).push_back(Ok(result));
        self
    }

    pub fn with_payload(self, payload: AnalyzerPayload) -> Self {
        self.with_result(AnalyzerResult::success(payload))
    }

    pub fn with_error(self, error: AnalyzerError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Capability initialised and shut down with this analyzer.
    pub fn with_capability(mut self, capability: Arc<dyn CapabilityProvider>) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs received, in call order.
    pub fn inputs(&self) -> Vec<AnalyzerInput> {
        lock(&self.inputs).clone()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    fn spec(&self) -> &AnalyzerSpec {
        &self.spec
    }

    async fn run(&self, input: &AnalyzerInput) -> AnalyzerOutcome<AnalyzerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inputs).push(input.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.script).pop_front();
        match next {
            Some(outcome) => {
                *lock(&self.last) = Some(outcome.clone());
                outcome
            }
            None => lock(&self.last)
                .clone()
                .unwrap_or_else(|| Ok(AnalyzerResult::skipped("no scripted outcome"))),
        }
    }

    async fn initialize(&self) -> Result<()> {
        match &self.capability {
            Some(capability) => capability.initialize().await,
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        match &self.capability {
            Some(capability) => capability.shutdown().await,
            None => Ok(()),
        }
    }
}

/// A capability provider that records its lifecycle.
#[derive(Default)]
pub struct MockCapability {
    name: String,
    initialized: AtomicBool,
    init_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    fail_init: bool,
}

impl MockCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Make `initialize` fail, as a model that cannot be loaded would.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(PipelineError::Config(format!(
                "capability '{}' failed to load",
                self.name
            )));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Neutral payload for each analyzer of the default graph: scores as zero.
pub fn neutral_payload(analyzer: &str) -> Option<AnalyzerPayload> {
    let payload = match analyzer {
        "image-authenticity" => AnalyzerPayload::ImageAuthenticity {
            ai_detected: false,
            confidence: 0.05,
            ai_images: 0,
            total_images: 1,
        },
        "text-extraction" => AnalyzerPayload::TextExtraction {
            combined_text: "Sample caption\nText from the image".into(),
            caption: "Sample caption".into(),
            words_extracted: 4,
            has_text: true,
        },
        "manipulation-detection" => AnalyzerPayload::Manipulation {
            manipulated: false,
            confidence: 0.02,
        },
        "claim-credibility" => AnalyzerPayload::ClaimCredibility {
            credibility_score: 75.0,
            red_flags: Vec::new(),
            requires_manual_review: false,
        },
        "source-reputation" => AnalyzerPayload::SourceReputation {
            urls_checked: 0,
            has_conspiracy: false,
            has_unreliable: false,
            has_satire: false,
            avg_reliability: 0.6,
        },
        _ => return None,
    };
    Some(payload)
}

/// The default analyzer graph with every analyzer returning its neutral payload.
///
/// `claim-credibility` and `source-reputation` depend on `text-extraction`.
pub fn default_analyzers() -> Vec<MockAnalyzer> {
    let independent = ["image-authenticity", "text-extraction", "manipulation-detection"];
    let dependent = ["claim-credibility", "source-reputation"];

    let mut analyzers = Vec::new();
    for name in independent {
        let mut analyzer = MockAnalyzer::new(name);
        if let Some(payload) = neutral_payload(name) {
            analyzer = analyzer.with_payload(payload);
        }
        analyzers.push(analyzer);
    }
    for name in dependent {
        let mut analyzer = MockAnalyzer::new(name).with_dependencies(["text-extraction"]);
        if let Some(payload) = neutral_payload(name) {
            analyzer = analyzer.with_payload(payload);
        }
        analyzers.push(analyzer);
    }
    analyzers
}

/// Pipeline configuration with millisecond backoff for fast tests.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_backoff(Duration::from_millis(1), Duration::from_millis(10))
        .with_default_analyzer_timeout(Duration::from_secs(5))
        .with_job_deadline(Duration::from_secs(10))
        .with_wait_poll_interval(Duration::from_millis(10))
}

/// Builder for a service over a [`MemoryStore`] and mocks.
///
/// # Example
///
/// ```rust,ignore
/// let scenario = TestScenario::new()
///     .replace(MockAnalyzer::new("image-authenticity").with_payload(payload));
/// let (service, store) = scenario.build()?;
/// ```
pub struct TestScenario {
    extractor: Arc<MockExtractor>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    config: PipelineConfig,
    store: Arc<MemoryStore>,
}

impl TestScenario {
    /// Default analyzer graph, generated content, fast config.
    pub fn new() -> Self {
        Self {
            extractor: Arc::new(MockExtractor::new()),
            analyzers: default_analyzers()
                .into_iter()
                .map(|a| Arc::new(a) as Arc<dyn Analyzer>)
                .collect(),
            config: fast_config(),
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<MockExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Swap the analyzer with the same name, or add it if new.
    pub fn replace(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        match self.analyzers.iter().position(|a| a.name() == analyzer.name()) {
            Some(i) => self.analyzers[i] = analyzer,
            None => self.analyzers.push(analyzer),
        }
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Builder with everything wired, for tests that add more pieces.
    pub fn builder(self) -> TrustServiceBuilder {
        TrustService::builder(self.extractor, Backends::shared(self.store))
            .with_analyzers(self.analyzers)
            .with_config(self.config)
    }

    pub fn build(self) -> Result<(TrustService, Arc<MemoryStore>)> {
        let store = self.store();
        Ok((self.builder().build()?, store))
    }
}

impl Default for TestScenario {
    fn default() -> Self {
        Self::new()
    }
}
