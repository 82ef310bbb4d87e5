use crate::agent::parser::extract_sub_questions;
use crate::agent::prompt::decomposition_prompt;
use crate::llm::{first_text, CompletionOptions, CompletionService};
use crate::pipeline::context::{Route, TaskContext};
use crate::pipeline::stage::{Session, Stage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

/// splits the question into sub-questions ending with the question itself
pub struct Decomposer {
    llm: Arc<dyn CompletionService>,
    options: CompletionOptions,
}

impl Decomposer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
        }
    }
}

/// never empty, and the last entry is always the original question
pub fn build_queue(mut sub_questions: Vec<String>, question: &str) -> VecDeque<String> {
    match sub_questions.last_mut() {
        Some(last) => *last = question.to_string(),
        None => sub_questions.push(question.to_string()),
    }
    sub_questions.into()
}

#[async_trait]
impl Stage for Decomposer {
    fn route(&self) -> Route {
        Route::Decomposer
    }

    #[tracing::instrument(skip_all, fields(stage = "decomposer"))]
    async fn step(&self, mut ctx: TaskContext, _session: &mut Session) -> TaskContext {
        let prompt = decomposition_prompt(&ctx.question, &ctx.evidence);
        let reply = first_text(self.llm.as_ref(), &prompt, &self.options).await;

        let extracted = extract_sub_questions(&reply);
        if extracted.is_empty() {
            tracing::warn!("no sub-questions extracted, using the question as is");
        }

        ctx.sub_questions = build_queue(extracted, &ctx.question);
        tracing::info!(sub_questions = ctx.sub_questions.len(), "question decomposed");

        ctx.initial_round = true;
        ctx.route = Route::Generator;
        ctx
    }
}
