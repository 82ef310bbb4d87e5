use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const SQL_SYSTEM_PROMPT: &str = "You are an expert in SQLite and table-based question answering. \
     Please follow the given examples and complete the task.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// sampling options for one completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub n: usize,
    pub max_tokens: usize,
    pub seed: Option<u64>,
    pub stop: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            n: 1,
            max_tokens: 300,
            seed: Some(42),
            stop: None,
        }
    }
}

/// one completion choice with an optional confidence proxy
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub score: Option<f64>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
        }
    }
}

/// text completion capability consumed by every pipeline stage
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Vec<Completion>>;
}

/// first completion text, or an empty string when the service fails or
/// returns nothing; stages treat an empty reply as a parse failure
pub async fn first_text(
    service: &dyn CompletionService,
    prompt: &str,
    options: &CompletionOptions,
) -> String {
    match service.complete(prompt, options).await {
        Ok(choices) => choices.into_iter().next().map(|c| c.text).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "completion failed, continuing with empty reply");
            String::new()
        }
    }
}
