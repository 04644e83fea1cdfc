use std::time::Duration;

use crate::error::Error;
use crate::llm::types::{CompletionRequest, CompletionResponse};

use super::LlmProvider;

/// Configuration for retry behavior on timed-out LLM calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial call).
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(1500),
        }
    }
}

impl From<&crate::config::RetrySettings> for RetryConfig {
    fn from(r: &crate::config::RetrySettings) -> Self {
        Self {
            max_retries: r.max_retries,
            backoff: Duration::from_millis(r.backoff_ms),
        }
    }
}

/// Wraps any `LlmProvider` with bounded retry on timeouts.
///
/// Retries on:
/// - request timeouts (`Error::Timeout`)
/// - connection-level network failures (aborted/refused before a response)
///
/// Does NOT retry on:
/// - any HTTP status error, including 429 and 5xx (the upstream reply
///   arrived; repeating the call changes token spend, not the outcome)
/// - JSON/protocol parse errors (deterministic failures)
/// - corpus/config errors (not LLM-related)
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Wrap a provider with default retry config (2 retries, 1500ms backoff).
    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, RetryConfig::default())
    }
}

/// Determine whether an error is a timeout-class failure worth retrying.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Timeout(_) => true,
        Error::Http(e) => e.is_timeout() || e.is_connect(),
        _ => false,
    }
}

impl<P: LlmProvider> LlmProvider for RetryingProvider<P> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt = attempt,
                    max_retries = self.config.max_retries,
                    backoff_ms = self.config.backoff.as_millis() as u64,
                    error = %last_err.as_ref().expect("last_err set before retry"),
                    "retrying LLM call after timeout"
                );
                tokio::time::sleep(self.config.backoff).await;
            }

            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) => {
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // All retries exhausted; return the last error
        Err(last_err.expect("at least one attempt must have been made"))
    }
}
