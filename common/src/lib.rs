pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod tracing;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PipelineConfig, RetryPolicy};
pub use error::{MagSqlError, Result};
pub use pipeline::{Orchestrator, TaskOutcome, TaskRequest};
