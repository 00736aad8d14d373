//! Integration tests for the full submit → analyze → score workflow.
//!
//! These tests drive the public service API over a MemoryStore:
//! 1. Submit a post reference
//! 2. Wait for the job to settle
//! 3. Inspect status, result, cache and dedup state

use std::sync::Arc;
use std::time::Duration;

use trust_engine::{
    testing::{fast_config, neutral_payload},
    AnalyzerError, AnalyzerPayload, CacheNamespace, ContentCache, ContentKey, ErrorKind,
    ExtractError, ExtractedContent, JobOutcome, JobState, JobStore, MockAnalyzer, MockCapability,
    MockExtractor, PipelineError, ScoreFlag, TestScenario,
};

const POST: &str = "post:ABC123";
const WAIT: Duration = Duration::from_secs(5);

/// Helper to unwrap a completed outcome.
fn completed(outcome: JobOutcome) -> trust_engine::AnalysisReport {
    match outcome {
        JobOutcome::Completed(report) => report,
        other => panic!("expected completed outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_neutral_post_scores_full_marks() {
    let (service, _store) = TestScenario::new().build().unwrap();

    let submission = service.submit(POST).await.unwrap();
    assert!(!submission.cached);
    assert!(!submission.deduplicated);

    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.results.len(), 5);

    let report = completed(service.get_result(submission.job_id).await.unwrap());
    assert_eq!(report.score.score, 100.0);
    assert_eq!(report.score.grade, "A+");
    assert!(report.score.flags.is_empty());
}

#[tokio::test]
async fn test_ai_generated_image_lowers_score() {
    let image = MockAnalyzer::new("image-authenticity").with_payload(
        AnalyzerPayload::ImageAuthenticity {
            ai_detected: true,
            confidence: 0.85,
            ai_images: 1,
            total_images: 1,
        },
    );
    let (service, _store) = TestScenario::new()
        .replace(Arc::new(image))
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    service.wait(submission.job_id, WAIT).await.unwrap();

    let report = completed(service.get_result(submission.job_id).await.unwrap());
    assert_eq!(report.score.score, 74.5);
    assert_eq!(report.score.grade, "B-");
    assert_eq!(report.score.adjustments.len(), 1);
    assert_eq!(report.score.adjustments[0].component, "AI Detection");
    assert!((report.score.adjustments[0].impact + 25.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_extraction_failure_fails_job_without_score() {
    let extractor = Arc::new(MockExtractor::new().failing(ExtractError::Unavailable(
        "post is private".into(),
    )));
    let image = Arc::new(MockAnalyzer::new("image-authenticity"));
    let (service, _store) = TestScenario::new()
        .with_extractor(extractor)
        .replace(image.clone())
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.score.is_none());
    assert_eq!(image.call_count(), 0);

    match service.get_result(submission.job_id).await.unwrap() {
        JobOutcome::Failed { error, .. } => {
            assert_eq!(error.kind, ErrorKind::ExtractionFailure);
            assert_eq!(error.component, "extractor");
            assert!(error.message.contains("post is private"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let status = service.get_status(submission.job_id).await.unwrap();
    assert!(status.message.starts_with("Analysis failed"));
}

#[tokio::test]
async fn test_upstream_extraction_error_is_retried() {
    let key = trust_engine::ContentKey::parse(POST).unwrap();
    let extractor = Arc::new(
        MockExtractor::new().with_failure(&key, ExtractError::Upstream("502 bad gateway".into())),
    );
    let (service, _store) = TestScenario::new()
        .with_extractor(extractor.clone())
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(extractor.call_count(), 2);
}

#[tokio::test]
async fn test_analyzer_timeout_completes_with_flag() {
    let payload = neutral_payload("claim-credibility").unwrap();
    let slow = MockAnalyzer::new("claim-credibility")
        .with_dependencies(["text-extraction"])
        .with_timeout(Duration::from_millis(50))
        .with_delay(Duration::from_millis(500))
        .with_payload(payload);
    let (service, _store) = TestScenario::new()
        .replace(Arc::new(slow))
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.results["claim-credibility"].is_timeout());

    let report = completed(service.get_result(submission.job_id).await.unwrap());
    assert_eq!(report.score.score, 100.0);
    assert!(report.score.flags.contains(&ScoreFlag::AnalyzerTimedOut {
        component: "Fact-Checking".into()
    }));
    assert!(report
        .score
        .omissions
        .iter()
        .any(|o| o.analyzer == "claim-credibility" && o.status == "failure"));
}

#[tokio::test]
async fn test_transient_analyzer_error_is_retried() {
    let image = Arc::new(
        MockAnalyzer::new("image-authenticity")
            .with_error(AnalyzerError::Transient("model warming up".into()))
            .with_payload(neutral_payload("image-authenticity").unwrap()),
    );
    let (service, _store) = TestScenario::new()
        .replace(image.clone())
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert!(job.results["image-authenticity"].is_success());
    assert_eq!(image.call_count(), 2);
}

#[tokio::test]
async fn test_dependent_analyzer_receives_upstream_text() {
    let claims = Arc::new(
        MockAnalyzer::new("claim-credibility")
            .with_dependencies(["text-extraction"])
            .with_payload(neutral_payload("claim-credibility").unwrap()),
    );
    let (service, _store) = TestScenario::new()
        .replace(claims.clone())
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    service.wait(submission.job_id, WAIT).await.unwrap();

    let inputs = claims.inputs();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].upstream("text-extraction").is_some());
    assert!(inputs[0].upstream("image-authenticity").is_none());
    assert_eq!(inputs[0].text(), "Sample caption\nText from the image");
}

#[tokio::test]
async fn test_failed_dependency_still_dispatches_dependent() {
    let text = MockAnalyzer::new("text-extraction")
        .non_retryable()
        .with_error(AnalyzerError::Permanent("OCR model missing".into()));
    let claims = Arc::new(
        MockAnalyzer::new("claim-credibility")
            .with_dependencies(["text-extraction"])
            .with_payload(neutral_payload("claim-credibility").unwrap()),
    );
    let (service, _store) = TestScenario::new()
        .replace(Arc::new(text))
        .replace(claims.clone())
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);

    // Falls back to the caption when OCR failed upstream
    let inputs = claims.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].text(), "Sample caption for ABC123");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_share_one_job() {
    let extractor = Arc::new(MockExtractor::new().with_delay(Duration::from_millis(200)));
    let scenario = TestScenario::new().with_extractor(extractor.clone());
    let (service, store) = scenario.build().unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.submit(POST).await }));
    }

    let mut submissions = Vec::new();
    for handle in handles {
        submissions.push(handle.await.unwrap().unwrap());
    }

    let job_id = submissions[0].job_id;
    assert!(submissions.iter().all(|s| s.job_id == job_id));
    assert_eq!(submissions.iter().filter(|s| !s.deduplicated).count(), 1);
    assert_eq!(store.job_count(), 1);

    service.wait(job_id, WAIT).await.unwrap();
    assert_eq!(extractor.call_count(), 1);
}

#[tokio::test]
async fn test_resubmission_is_served_from_cache() {
    let extractor = Arc::new(MockExtractor::new());
    let image = Arc::new(
        MockAnalyzer::new("image-authenticity")
            .with_payload(neutral_payload("image-authenticity").unwrap()),
    );
    let (service, store) = TestScenario::new()
        .with_extractor(extractor.clone())
        .replace(image.clone())
        .build()
        .unwrap();

    let first = service.submit(POST).await.unwrap();
    service.wait(first.job_id, WAIT).await.unwrap();
    let first_report = completed(service.get_result(first.job_id).await.unwrap());

    // Same post spelled as a URL
    let second = service
        .submit("https://www.instagram.com/p/ABC123/?igsh=share")
        .await
        .unwrap();
    assert!(second.cached);
    assert_eq!(second.state, JobState::Completed);
    assert_ne!(second.job_id, first.job_id);

    let second_report = completed(service.get_result(second.job_id).await.unwrap());
    assert!(second_report.cached);
    assert_eq!(second_report.score, first_report.score);
    assert_eq!(second_report.results, first_report.results);

    assert_eq!(image.call_count(), 1);
    assert_eq!(extractor.call_count(), 1);
    assert_eq!(store.job_count(), 2);
}

#[tokio::test]
async fn test_invalidate_forces_recompute() {
    let extractor = Arc::new(MockExtractor::new());
    let image = Arc::new(
        MockAnalyzer::new("image-authenticity")
            .with_payload(neutral_payload("image-authenticity").unwrap()),
    );
    let (service, _store) = TestScenario::new()
        .with_extractor(extractor.clone())
        .replace(image.clone())
        .build()
        .unwrap();

    let first = service.submit(POST).await.unwrap();
    service.wait(first.job_id, WAIT).await.unwrap();

    let key = service
        .invalidate("instagram.com/reel/ABC123")
        .await
        .unwrap();
    assert_eq!(key.as_str(), POST);

    let second = service.submit(POST).await.unwrap();
    assert!(!second.cached);
    service.wait(second.job_id, WAIT).await.unwrap();

    assert_eq!(image.call_count(), 2);
    assert_eq!(extractor.call_count(), 2);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let image = MockAnalyzer::new("image-authenticity")
        .with_delay(Duration::from_millis(30))
        .with_payload(neutral_payload("image-authenticity").unwrap());
    let (service, _store) = TestScenario::new()
        .replace(Arc::new(image))
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let mut seen = Vec::new();
    let polling = async {
        loop {
            let status = service.get_status(submission.job_id).await.unwrap();
            seen.push((status.state, status.progress));
            if status.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(WAIT, polling).await.unwrap();

    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1), "{seen:?}");
    assert_eq!(seen.last().unwrap(), &(JobState::Completed, 100));
}

#[tokio::test]
async fn test_result_before_completion_is_not_ready() {
    let extractor = Arc::new(MockExtractor::new().with_delay(Duration::from_millis(300)));
    let (service, _store) = TestScenario::new()
        .with_extractor(extractor)
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    match service.get_result(submission.job_id).await.unwrap() {
        JobOutcome::NotReady { job_id, state, .. } => {
            assert_eq!(job_id, submission.job_id);
            assert!(!state.is_terminal());
        }
        other => panic!("expected not ready, got {other:?}"),
    }
}

#[tokio::test]
async fn test_job_deadline_fails_overdue_and_frees_key() {
    let stuck = MockAnalyzer::new("manipulation-detection")
        .with_timeout(Duration::from_secs(30))
        .with_delay(Duration::from_secs(10))
        .with_payload(neutral_payload("manipulation-detection").unwrap());
    let (service, store) = TestScenario::new()
        .replace(Arc::new(stuck))
        .with_config(fast_config().with_job_deadline(Duration::from_millis(150)))
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Overdue);
    assert!(job.score.is_none());

    // Release follows the terminal transition
    tokio::time::timeout(WAIT, async {
        while store.dedup_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let retry = service.submit(POST).await.unwrap();
    assert!(!retry.deduplicated);
    assert_ne!(retry.job_id, submission.job_id);
}

#[tokio::test]
async fn test_all_analyzers_skipped_is_flagged_completion() {
    let mut scenario = TestScenario::new();
    for name in [
        "image-authenticity",
        "text-extraction",
        "manipulation-detection",
        "claim-credibility",
        "source-reputation",
    ] {
        scenario = scenario.replace(Arc::new(MockAnalyzer::new(name)));
    }
    let (service, _store) = scenario.build().unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);

    let report = completed(service.get_result(submission.job_id).await.unwrap());
    assert!(report.score.is_unanalyzable());
    assert_eq!(report.score.flags[0], ScoreFlag::InsufficientSignal);
    assert_eq!(report.score.omissions.len(), 5);
}

#[tokio::test]
async fn test_invalid_reference_is_rejected_before_job_exists() {
    let (service, store) = TestScenario::new().build().unwrap();

    for input in ["", "https://example.com/p/ABC123", "https://www.instagram.com/explore/"] {
        let err = service.submit(input).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }), "{input}: {err}");
    }
    assert_eq!(store.job_count(), 0);
    assert!(service.invalidate("not a post").await.is_err());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (service, _store) = TestScenario::new().build().unwrap();
    let id = uuid::Uuid::new_v4();

    assert!(matches!(
        service.get_status(id).await,
        Err(PipelineError::JobNotFound(_))
    ));
    assert!(matches!(
        service.get_result(id).await,
        Err(PipelineError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_capability_lifecycle() {
    let model = Arc::new(MockCapability::new("vision-model"));
    let image = MockAnalyzer::new("image-authenticity")
        .with_capability(model.clone())
        .with_payload(neutral_payload("image-authenticity").unwrap());
    let client = Arc::new(MockCapability::new("fact-check-client"));

    let service = TestScenario::new()
        .replace(Arc::new(image))
        .builder()
        .with_capability(client.clone())
        .build()
        .unwrap();

    service.start().await.unwrap();
    assert!(model.is_initialized());
    assert!(client.is_initialized());
    assert_eq!(model.init_calls(), 1);

    service.shutdown().await;
    assert!(!model.is_initialized());
    assert_eq!(client.shutdown_calls(), 1);
    assert!(matches!(
        service.submit(POST).await,
        Err(PipelineError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_failing_capability_aborts_start() {
    let model = Arc::new(MockCapability::new("vision-model").failing_init());
    let service = TestScenario::new()
        .builder()
        .with_capability(model.clone())
        .build()
        .unwrap();

    assert!(matches!(service.start().await, Err(PipelineError::Config(_))));
    assert_eq!(model.init_calls(), 1);
}

#[tokio::test]
async fn test_invalid_analyzer_graph_is_rejected() {
    let cyclic_a = MockAnalyzer::new("claim-credibility").with_dependencies(["source-reputation"]);
    let cyclic_b = MockAnalyzer::new("source-reputation").with_dependencies(["claim-credibility"]);
    let result = TestScenario::new()
        .replace(Arc::new(cyclic_a))
        .replace(Arc::new(cyclic_b))
        .build();
    assert!(matches!(result, Err(PipelineError::Config(_))));

    let orphan = MockAnalyzer::new("claim-credibility").with_dependencies(["translation"]);
    let result = TestScenario::new().replace(Arc::new(orphan)).build();
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[tokio::test]
async fn test_dependent_settles_while_slow_independent_runs() {
    let image = MockAnalyzer::new("image-authenticity")
        .with_delay(Duration::from_secs(1))
        .with_payload(neutral_payload("image-authenticity").unwrap());
    let (service, store) = TestScenario::new()
        .replace(Arc::new(image))
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let early = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            let job = JobStore::get(store.as_ref(), submission.job_id)
                .await
                .unwrap()
                .unwrap();
            if job.results.contains_key("claim-credibility") {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("claim-credibility waited for image-authenticity");

    assert!(!early.results.contains_key("image-authenticity"));
    assert_eq!(early.state, JobState::AnalyzingParallel);

    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.results["image-authenticity"].is_success());
}

#[tokio::test]
async fn test_cached_content_skips_extractor() {
    let extractor = Arc::new(MockExtractor::new());
    let image = Arc::new(
        MockAnalyzer::new("image-authenticity")
            .with_payload(neutral_payload("image-authenticity").unwrap()),
    );
    let (service, store) = TestScenario::new()
        .with_extractor(extractor.clone())
        .replace(image.clone())
        .build()
        .unwrap();

    let key = ContentKey::parse(POST).unwrap();
    let content = ExtractedContent::new(key.clone(), "photo").with_caption("Cached caption");
    ContentCache::put(
        store.as_ref(),
        &key,
        CacheNamespace::Extracted,
        serde_json::to_value(&content).unwrap(),
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    let submission = service.submit(POST).await.unwrap();
    assert!(!submission.cached);
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);

    assert_eq!(extractor.call_count(), 0);
    assert_eq!(image.inputs()[0].content.caption, "Cached caption");
    assert_eq!(service.metrics().extracted_cache.hits, 1);
}

#[tokio::test]
async fn test_queued_job_keeps_its_key() {
    let extractor = Arc::new(MockExtractor::new().with_delay(Duration::from_millis(250)));
    let config = fast_config()
        .with_max_concurrent_jobs(1)
        .with_job_deadline(Duration::from_millis(300))
        .with_dedup_lease_grace(Duration::ZERO);
    let (service, store) = TestScenario::new()
        .with_extractor(extractor)
        .with_config(config)
        .build()
        .unwrap();

    let first = service.submit("post:AAA").await.unwrap();
    let queued = service.submit("post:BBB").await.unwrap();
    // Longer than the lease taken at submit time
    tokio::time::sleep(Duration::from_millis(350)).await;

    let again = service.submit("post:BBB").await.unwrap();
    assert_eq!(again.job_id, queued.job_id);
    assert!(again.deduplicated);
    assert_eq!(store.job_count(), 2);

    for job_id in [first.job_id, queued.job_id] {
        let job = service.wait(job_id, WAIT).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
}

#[tokio::test]
async fn test_non_finite_confidence_is_omitted() {
    let image = MockAnalyzer::new("image-authenticity").with_payload(
        AnalyzerPayload::ImageAuthenticity {
            ai_detected: true,
            confidence: f64::NAN,
            ai_images: 1,
            total_images: 1,
        },
    );
    let (service, _store) = TestScenario::new()
        .replace(Arc::new(image))
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    let job = service.wait(submission.job_id, WAIT).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(!job.results["image-authenticity"].is_success());

    let report = completed(service.get_result(submission.job_id).await.unwrap());
    assert!(report.score.score.is_finite());
    assert_eq!(report.score.score, 100.0);
    assert!(report.score.flags.contains(&ScoreFlag::AnalyzerFailed {
        component: "AI Detection".into()
    }));

    // The stored result still decodes from the analysis cache
    let resubmitted = service.submit(POST).await.unwrap();
    assert!(resubmitted.cached);
}

#[tokio::test]
async fn test_shutdown_settles_in_flight_jobs() {
    let extractor = Arc::new(MockExtractor::new().with_delay(Duration::from_secs(5)));
    let (service, store) = TestScenario::new()
        .with_extractor(extractor)
        .build()
        .unwrap();

    let submission = service.submit(POST).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.shutdown().await;

    let job = JobStore::get(store.as_ref(), submission.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Internal);
    assert_eq!(store.dedup_count(), 0);
}

#[tokio::test]
async fn test_metrics_count_runs_and_cache_hits() {
    let (service, _store) = TestScenario::new().build().unwrap();

    let first = service.submit(POST).await.unwrap();
    service.wait(first.job_id, WAIT).await.unwrap();
    let second = service.submit(POST).await.unwrap();
    assert!(second.cached);

    let metrics = service.metrics();
    assert_eq!(metrics.submitted, 2);
    assert_eq!((metrics.completed, metrics.failed), (1, 0));
    assert_eq!((metrics.analysis_cache.hits, metrics.analysis_cache.misses), (1, 1));
    assert_eq!(metrics.analysis_cache.hit_rate, 50.0);
    assert_eq!(metrics.extracted_cache.misses, 1);
    assert_eq!(metrics.analyzers.len(), 5);
    assert!(metrics.analyzers.values().all(|t| t.runs == 1 && t.failures == 0));
    assert!(metrics.mean_run_ms.is_some());
}
