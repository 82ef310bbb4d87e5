use crate::error::{MagSqlError, Result};
use crate::llm::model::{
    Completion, CompletionOptions, CompletionService, Message, SQL_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    /// bound on one request, connect to last byte
    pub timeout_secs: u64,
}

/// chat-completions client for any openai-compatible endpoint
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    top_p: f32,
    n: usize,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{}/chat/completions", base)
    }
}

fn is_context_overflow(body: &str) -> bool {
    body.contains("maximum context length") || body.contains("context_length_exceeded")
}

#[async_trait]
impl CompletionService for OpenAiClient {
    #[tracing::instrument(skip(self, prompt, options), fields(llm.model = %self.config.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Vec<Completion>> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message::system(SQL_SYSTEM_PROMPT), Message::user(prompt)],
            temperature: options.temperature,
            top_p: options.top_p,
            n: options.n,
            max_tokens: options.max_tokens,
            seed: options.seed,
            stop: options.stop.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if is_context_overflow(&body) {
                return Err(MagSqlError::ContextOverflow(body));
            }
            return Err(MagSqlError::Completion(format!(
                "request failed with {}: {}",
                status, body
            )));
        }

        let body: ChatResponse = response.json().await?;
        let completions: Vec<Completion> = body
            .choices
            .into_iter()
            .map(|c| Completion::text(c.message.content.unwrap_or_default()))
            .collect();

        tracing::debug!(choices = completions.len(), "completion received");
        Ok(completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults_to_openai() {
        let client = OpenAiClient::new(OpenAiConfig {
            model: "gpt-4.1-mini".to_string(),
            api_key: "key".to_string(),
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
        .unwrap();
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = OpenAiClient::new(OpenAiConfig {
            model: "local".to_string(),
            api_key: String::new(),
            base_url: Some("http://localhost:8000/v1/".to_string()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization_skips_empty_stop() {
        let request = ChatRequest {
            model: "m",
            messages: vec![Message::user("q")],
            temperature: 0.0,
            top_p: 1.0,
            n: 1,
            max_tokens: 300,
            seed: Some(42),
            stop: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["seed"], 42);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_context_overflow_detection() {
        assert!(is_context_overflow(
            "This model's maximum context length is 8192 tokens"
        ));
        assert!(!is_context_overflow("rate limit reached"));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        // accepts connections into the backlog but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = OpenAiClient::new(OpenAiConfig {
            model: "local".to_string(),
            api_key: String::new(),
            base_url: Some(format!("http://127.0.0.1:{}/v1", port)),
            timeout_secs: 1,
        })
        .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            client.complete("q", &CompletionOptions::default()),
        )
        .await
        .expect("request should be bounded by the client timeout");

        match result {
            Err(MagSqlError::Http(e)) => assert!(e.is_timeout()),
            other => panic!("unexpected result: {:?}", other.map(|c| c.len())),
        }

        let retrying = crate::llm::RetryingService::new(client, crate::RetryPolicy::immediate(2));
        let out = retrying
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out[0].text, "PLACEHOLDER");
        drop(listener);
    }
}
