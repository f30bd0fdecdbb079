//! Retry wrapper with bounded exponential backoff for transient provider errors.
//!
//! Only errors where `CardwiseError::is_retryable()` holds are retried;
//! rejected requests, missing keys and deadlines fail immediately.

use async_trait::async_trait;
use cardwise_core::error::Result;
use cardwise_core::traits::{GenerateParams, Provider};
use cardwise_core::types::{Message, ProviderResponse, ToolDefinition};
use std::future::Future;
use std::time::Duration;

/// Upper bound on a single backoff, as a multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, … capped.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX)
        .min(MAX_BACKOFF_FACTOR);
    base * factor
}

/// Run `operation` up to `max_retries + 1` times.
pub async fn retry_with_backoff<F, Fut, T>(
    label: &str,
    max_retries: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(output) => {
                if attempts > 1 {
                    tracing::info!("{label} succeeded on attempt {}/{}", attempts, max_retries + 1);
                }
                return Ok(output);
            }
            Err(e) if e.is_retryable() && attempts <= max_retries => {
                let delay = backoff_delay(base_delay, attempts);
                tracing::warn!(
                    "{label} failed (attempt {}/{}): {}. Retrying in {:?}",
                    attempts,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!("{label} failed after {} attempts: {}", attempts, e);
                }
                return Err(e);
            }
        }
    }
}

/// A provider that retries its inner provider's transient failures.
pub struct RetryProvider {
    inner: Box<dyn Provider>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryProvider {
    pub fn new(inner: Box<dyn Provider>, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        params: &GenerateParams,
    ) -> Result<ProviderResponse> {
        retry_with_backoff(self.inner.name(), self.max_retries, self.base_delay, || {
            self.inner.chat(messages, tools, params)
        })
        .await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}
