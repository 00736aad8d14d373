//! Per-analyzer execution: deadline, bounded retry, result normalisation.
//!
//! [`execute`] never returns an error. Whatever happens to the analyzer
//! (timeout, transient error after the last retry, panic, bad payload) ends
//! up as an [`AnalyzerResult`] the scoring engine can reason about.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{AnalyzerError, ErrorKind};
use crate::traits::analyzer::{Analyzer, AnalyzerInput};
use crate::types::config::PipelineConfig;
use crate::types::result::{AnalyzerResult, PAYLOAD_SCHEMA_VERSION};

/// Run one analyzer to a settled result.
///
/// Each attempt gets the analyzer's own deadline (or the pipeline default).
/// A timed-out attempt is final; a retryable error is retried up to
/// `max_retries` times with jittered exponential backoff.
pub async fn execute(
    analyzer: &dyn Analyzer,
    input: &AnalyzerInput,
    config: &PipelineConfig,
) -> AnalyzerResult {
    let spec = analyzer.spec();
    let deadline = spec.timeout.unwrap_or_else(|| config.default_analyzer_timeout());
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let run = AssertUnwindSafe(analyzer.run(input)).catch_unwind();

        let err = match tokio::time::timeout(deadline, run).await {
            Err(_) => {
                warn!(
                    analyzer = %spec.name,
                    attempt,
                    deadline_ms = deadline.as_millis() as u64,
                    "analyzer timed out"
                );
                return failed(
                    ErrorKind::Timeout,
                    format!("exceeded {}ms deadline", deadline.as_millis()),
                    false,
                    attempt,
                    started,
                );
            }
            Ok(Err(_panic)) => {
                warn!(analyzer = %spec.name, attempt, "analyzer panicked");
                return failed(
                    ErrorKind::AnalyzerFailure,
                    "analyzer panicked".to_string(),
                    false,
                    attempt,
                    started,
                );
            }
            Ok(Ok(Ok(result))) => match check_schema(result) {
                Ok(result) => {
                    debug!(
                        analyzer = %spec.name,
                        attempt,
                        status = result.status_label(),
                        "analyzer settled"
                    );
                    return result.with_duration(started.elapsed());
                }
                Err(e) => e,
            },
            Ok(Ok(Err(e))) => e,
        };

        let retryable = spec.retryable && err.is_retryable();
        if retryable && attempt <= config.max_retries {
            let delay = config.backoff_for(attempt - 1);
            warn!(
                analyzer = %spec.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "analyzer failed, retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        warn!(analyzer = %spec.name, attempt, error = %err, "analyzer failed");
        return failed(
            ErrorKind::AnalyzerFailure,
            err.to_string(),
            err.is_retryable(),
            attempt,
            started,
        );
    }
}

/// Reject successes carrying a payload schema this build does not score,
/// or numbers that cannot be scored or stored as JSON.
fn check_schema(result: AnalyzerResult) -> Result<AnalyzerResult, AnalyzerError> {
    if let AnalyzerResult::Success {
        payload,
        confidence,
        ..
    } = &result
    {
        if payload.schema_version != PAYLOAD_SCHEMA_VERSION {
            return Err(AnalyzerError::InvalidPayload(format!(
                "unsupported schema version {}",
                payload.schema_version
            )));
        }
        if let Some(field) = payload.payload.non_finite_field() {
            return Err(AnalyzerError::InvalidPayload(format!(
                "{field} is not a finite number"
            )));
        }
        if confidence.is_some_and(|c| !c.is_finite()) {
            return Err(AnalyzerError::InvalidPayload(
                "confidence is not a finite number".to_string(),
            ));
        }
    }
    Ok(result)
}

fn failed(
    kind: ErrorKind,
    message: String,
    retryable: bool,
    attempts: u32,
    started: Instant,
) -> AnalyzerResult {
    AnalyzerResult::Failure {
        kind,
        message,
        retryable,
        attempts,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
