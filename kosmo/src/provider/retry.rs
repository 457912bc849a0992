//! The provider facade: retry and deadline handling over any [`Provider`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::message::Message;

use super::{Capabilities, ChatOptions, ChunkStream, Completion, Provider};

/// Default per-LLM-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Exponential-backoff retry policy for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff delay before retry number `attempt` (1-based), with jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        // Up to 25% jitter to spread concurrent retries.
        let jitter_ms = fastrand::u64(0..=(capped.as_millis() as u64 / 4).max(1));
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Uniform `complete`/`stream` API over a vendor adapter, with bounded
/// retry of transient failures and a per-call deadline.
#[derive(Clone)]
pub struct ProviderFacade {
    inner: Arc<dyn Provider>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ProviderFacade {
    /// Wrap a provider with the default policy.
    #[must_use]
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            retry: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The wrapped provider's capabilities.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    /// The configured per-call deadline.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Produce a complete response, retrying transient failures.
    ///
    /// # Errors
    ///
    /// The last failure once retries are exhausted, or the first
    /// non-transient failure.
    pub async fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<Completion, ProviderError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.call_timeout,
                self.inner.complete(messages, options),
            )
            .await
            .unwrap_or(Err(ProviderError::Timeout(self.call_timeout)));

            match result {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    debug!(%err, attempt, delay_ms = delay.as_millis() as u64, "retrying provider call");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%err, attempts = attempt + 1, "provider call failed");
                    return Err(err);
                }
            }
        }
    }

    /// Open a chunk stream, retrying transient failures while
    /// establishing it. Failures mid-stream are not retried; the caller
    /// sees them as stream items.
    ///
    /// # Errors
    ///
    /// As for [`complete`](Self::complete).
    pub async fn stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.call_timeout,
                self.inner.stream(messages, options),
            )
            .await
            .unwrap_or(Err(ProviderError::Timeout(self.call_timeout)));

            match result {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    debug!(%err, attempt, delay_ms = delay.as_millis() as u64, "retrying provider stream");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%err, attempts = attempt + 1, "provider stream failed");
                    return Err(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for ProviderFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFacade")
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
