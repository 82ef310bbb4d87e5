use crate::error::{MagSqlError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// tunable policy for one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// dispatch rounds before a task is silently truncated
    pub max_rounds: usize,
    /// repair attempts allowed per sub-question
    pub max_repairs: usize,
    /// tables with more columns than this are pruned
    pub prune_column_threshold: usize,
    /// minimum similarity for a literal value match
    pub similarity_threshold: f64,
    /// matched literals kept after sorting longest-first
    pub max_matched_literals: usize,
    /// deduplicated value samples rendered per column
    pub max_value_samples: usize,
    /// columns with more distinct values than this are skipped by value matching
    pub max_match_candidates: usize,
    pub execution_timeout_secs: u64,
    pub disable_pruning: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            max_repairs: 2,
            prune_column_threshold: 10,
            similarity_threshold: 0.9,
            max_matched_literals: 10,
            max_value_samples: 6,
            max_match_candidates: 2000,
            execution_timeout_secs: 30,
            disable_pruning: false,
        }
    }
}

impl PipelineConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(MagSqlError::Config("max_rounds must be at least 1".to_string()));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(MagSqlError::Config(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.execution_timeout_secs == 0 {
            return Err(MagSqlError::Config(
                "execution_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// bounded retry schedule for the completion service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// wait before retry n is `backoff_ms[min(n, len - 1)]`; empty means no wait
    pub backoff_ms: Vec<u64>,
    /// text substituted when every attempt failed or the prompt overflowed
    pub placeholder: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![10_000],
            placeholder: "PLACEHOLDER".to_string(),
        }
    }
}

impl RetryPolicy {
    /// policy with no waiting, used by tests and offline runs
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            backoff_ms: Vec::new(),
            ..Self::default()
        }
    }

    pub fn backoff(&self, retry: usize) -> Duration {
        match self.backoff_ms.len() {
            0 => Duration::ZERO,
            len => Duration::from_millis(self.backoff_ms[retry.min(len - 1)]),
        }
    }
}

/// true when the variable is set to 1, true or yes
pub fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| {
            let v = v.to_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}
