//! Bounded retry with backoff for completion calls.
//!
//! Retries only transient failures (rate limits, transport errors) within a
//! single stage invocation. A timeout is that stage's failure and is never
//! retried — the per-lead failure policy lives in the orchestrator.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Retry policy for one completion call.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; doubled per attempt, plus jitter.
    pub base_delay: Duration,
    /// Independent timeout applied to every attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Run one completion with the given policy.
pub(crate) async fn complete_with_retry(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    policy: &RetryPolicy,
) -> Result<CompletionResponse, LlmError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match tokio::time::timeout(policy.timeout, provider.complete(request.clone())).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => {
                if attempt >= policy.max_attempts || !e.is_retryable() {
                    return Err(e);
                }
                let delay = backoff_delay(policy.base_delay, attempt);
                warn!(
                    model = provider.model_name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Completion failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(_elapsed) => {
                return Err(LlmError::Timeout {
                    model: provider.model_name().to_string(),
                    timeout: policy.timeout,
                });
            }
        }
    }
}

/// Exponential backoff with up to 250ms of jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(8));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    exp + jitter
}
