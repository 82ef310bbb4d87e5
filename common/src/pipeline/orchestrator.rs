use crate::agent::{Decomposer, Generator, Refiner, SchemaLinker};
use crate::config::PipelineConfig;
use crate::llm::CompletionService;
use crate::pipeline::context::{Route, TaskContext, TaskOutcome, TaskRequest};
use crate::pipeline::stage::{Session, Stage};
use crate::store::StoreGuard;
use std::sync::Arc;
use tracing::Instrument;

/// drives one task through the stages until it terminates or runs out of rounds
pub struct Orchestrator {
    stages: Vec<Arc<dyn Stage>>,
    config: PipelineConfig,
}

impl Orchestrator {
    /// the standard linker, decomposer, generator and refiner, sharing one model
    pub fn new(llm: Arc<dyn CompletionService>, config: PipelineConfig) -> Self {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(SchemaLinker::new(Arc::clone(&llm), config.clone())),
            Arc::new(Decomposer::new(Arc::clone(&llm))),
            Arc::new(Generator::new(Arc::clone(&llm))),
            Arc::new(Refiner::new(llm, config.clone())),
        ];
        Self::with_stages(stages, config)
    }

    pub fn with_stages(stages: Vec<Arc<dyn Stage>>, config: PipelineConfig) -> Self {
        Self { stages, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn stage_for(&self, route: Route) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|stage| stage.route() == route)
    }

    /// runs the dispatch loop and returns the final context with the rounds used
    pub async fn drive(&self, mut ctx: TaskContext, session: &mut Session) -> (TaskContext, usize) {
        for round in 0..self.config.max_rounds {
            if ctx.route == Route::Terminal {
                return (ctx, round);
            }

            let route = ctx.route;
            let span = tracing::info_span!("round", round = round, route = %route);

            ctx = match self.stage_for(route) {
                Some(stage) => stage.step(ctx, session).instrument(span).await,
                None => {
                    tracing::warn!(route = %route, "no stage answers this route");
                    ctx
                }
            };
        }

        let rounds = self.config.max_rounds;
        (ctx, rounds)
    }

    /// one question against one table; the store is closed on every exit path
    #[tracing::instrument(skip_all, fields(table = %request.table))]
    pub async fn run(&self, request: TaskRequest) -> TaskOutcome {
        let guard = StoreGuard::new(Arc::clone(&request.store));
        let mut session = Session::new(guard.store());
        let ctx = request.context();

        let (ctx, rounds) = self.drive(ctx, &mut session).await;
        drop(session);
        drop(guard);

        if ctx.route == Route::Terminal {
            tracing::info!(rounds, "task completed");
            TaskOutcome::Completed {
                sql: ctx.candidate_sql,
                column_selection: ctx.chosen_columns,
                was_pruned: ctx.was_pruned,
                rounds,
            }
        } else {
            tracing::warn!(rounds, route = %ctx.route, "round budget exhausted");
            TaskOutcome::Exhausted { rounds }
        }
    }
}
