pub mod client;
pub mod model;
pub mod retry;

pub use client::{OpenAiClient, OpenAiConfig};
pub use model::{
    first_text, Completion, CompletionOptions, CompletionService, Message, MessageRole,
    SQL_SYSTEM_PROMPT,
};
pub use retry::RetryingService;
