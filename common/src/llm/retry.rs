use crate::config::RetryPolicy;
use crate::error::{MagSqlError, Result};
use crate::llm::model::{Completion, CompletionOptions, CompletionService};
use async_trait::async_trait;

/// wraps a completion service with a bounded retry policy.
///
/// transport failures never surface: after the last attempt, or right away
/// on a context-length overflow, the policy placeholder is returned instead.
pub struct RetryingService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: CompletionService> RetryingService<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn placeholder(&self) -> Vec<Completion> {
        vec![Completion::text(self.policy.placeholder.clone())]
    }
}

#[async_trait]
impl<S: CompletionService> CompletionService for RetryingService<S> {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Vec<Completion>> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.inner.complete(prompt, options).await {
                Ok(completions) => return Ok(completions),
                Err(MagSqlError::ContextOverflow(e)) => {
                    tracing::warn!(error = %e, "prompt exceeds context length, returning placeholder");
                    return Ok(self.placeholder());
                }
                Err(e) => {
                    tracing::warn!("completion attempt {}/{} failed: {}", attempt, max_attempts, e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
                    }
                }
            }
        }

        tracing::warn!("completion retries exhausted, returning placeholder");
        Ok(self.placeholder())
    }
}
