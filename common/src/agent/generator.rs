use crate::agent::parser::extract_sql;
use crate::agent::prompt::{continuation_generation_prompt, initial_generation_prompt, PromptInput};
use crate::llm::{first_text, CompletionOptions, CompletionService};
use crate::pipeline::context::{Route, TaskContext};
use crate::pipeline::stage::{Session, Stage};
use async_trait::async_trait;
use std::sync::Arc;

/// writes one sql candidate for the head of the sub-question queue
pub struct Generator {
    llm: Arc<dyn CompletionService>,
    options: CompletionOptions,
}

impl Generator {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self {
            llm,
            options: CompletionOptions::default(),
        }
    }

    pub fn build_prompt(&self, ctx: &TaskContext) -> String {
        let input = PromptInput::from_context(ctx, ctx.current_sub_question());

        match (&ctx.last_sub_question, &ctx.last_sub_sql) {
            (Some(sub_question), Some(sub_sql)) if !ctx.initial_round => {
                continuation_generation_prompt(&input, sub_question, sub_sql)
            }
            _ => initial_generation_prompt(&input),
        }
    }
}

#[async_trait]
impl Stage for Generator {
    fn route(&self) -> Route {
        Route::Generator
    }

    #[tracing::instrument(skip_all, fields(stage = "generator", initial = ctx.initial_round, pending = ctx.sub_questions.len()))]
    async fn step(&self, mut ctx: TaskContext, _session: &mut Session) -> TaskContext {
        let prompt = self.build_prompt(&ctx);
        ctx.initial_round = false;

        let reply = first_text(self.llm.as_ref(), &prompt, &self.options).await;
        ctx.candidate_sql = extract_sql(&reply);
        ctx.last_reasoning = reply;

        if ctx.candidate_sql.is_empty() {
            tracing::warn!("no sql found in generator reply");
        } else {
            tracing::info!(sql = %ctx.candidate_sql, "sql candidate generated");
        }

        ctx.was_repaired = false;
        ctx.route = Route::Refiner;
        ctx
    }
}
