use crate::agent::parser::parse_selection;
use crate::agent::prompt::{selection_prompt, PromptInput};
use crate::config::PipelineConfig;
use crate::llm::{first_text, CompletionOptions, CompletionService};
use crate::pipeline::context::{ColumnSelection, Route, TaskContext};
use crate::pipeline::stage::{Session, Stage};
use crate::schema::{
    describe_columns, format_literal, is_informative, match_values, rank_literals,
    render_complete, render_details, render_primary_key, render_reduced, TableContent,
};
use async_trait::async_trait;
use std::sync::Arc;

/// describes the table, matches question literals and prunes wide schemas
pub struct SchemaLinker {
    llm: Arc<dyn CompletionService>,
    config: PipelineConfig,
    options: CompletionOptions,
}

impl SchemaLinker {
    pub fn new(llm: Arc<dyn CompletionService>, config: PipelineConfig) -> Self {
        Self {
            llm,
            config,
            options: CompletionOptions::default(),
        }
    }

    /// literal values from text columns that occur in the question
    pub fn match_literals(&self, question: &str, table: &str, content: &TableContent) -> Vec<String> {
        let mut literals = Vec::new();

        for (column, values) in &content.text_values {
            if values.len() > self.config.max_match_candidates {
                tracing::debug!(column = %column, values = values.len(), "column too large for value matching");
                continue;
            }

            for found in match_values(question, values, self.config.similarity_threshold) {
                if is_informative(&found.value) {
                    literals.push(format_literal(table, column, &found.value));
                }
            }
        }

        rank_literals(literals, self.config.max_matched_literals)
    }

    pub fn needs_pruning(&self, content: &TableContent) -> bool {
        !self.config.disable_pruning
            && content.schema.columns.len() > self.config.prune_column_threshold
    }

    async fn prune(&self, ctx: &TaskContext, columns: &[String]) -> ColumnSelection {
        let input = PromptInput::from_context(ctx, &ctx.question)
            .with_schema(ctx.full_schema_description());
        let prompt = selection_prompt(&ctx.table_name, &input);

        let reply = first_text(self.llm.as_ref(), &prompt, &self.options).await;
        let selection = parse_selection(&reply, &ctx.table_name, columns);
        if selection.is_empty() {
            tracing::warn!("could not parse column selection, continuing with an empty one");
        }
        selection
    }
}

#[async_trait]
impl Stage for SchemaLinker {
    fn route(&self) -> Route {
        Route::SchemaLinker
    }

    #[tracing::instrument(skip_all, fields(stage = "schema_linker", table = %ctx.table_name))]
    async fn step(&self, mut ctx: TaskContext, session: &mut Session) -> TaskContext {
        let table = ctx.table_name.clone();

        let content = match session.cache.load(Arc::clone(&session.store), &table).await {
            Ok(content) => content.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read table, continuing with an empty schema");
                TableContent::default()
            }
        };

        ctx.matched_literals = self.match_literals(&ctx.question, &table, &content);
        tracing::info!(matched = ctx.matched_literals.len(), "literal values matched");

        let columns = describe_columns(&content, &ctx.column_notes, self.config.max_value_samples);
        let column_names = content.column_names();

        ctx.set_full_schema_description(render_complete(&table, &columns));
        ctx.primary_key = render_primary_key(&table, &content.primary_keys);
        ctx.foreign_key = String::new();

        if let Some(preset) = ctx.preset_selection.clone() {
            tracing::info!("using preset column selection");
            let selected = preset.get(&table).cloned().unwrap_or_default();
            ctx.schema_description = ctx.full_schema_description().to_string();
            ctx.column_details = render_details(&table, &columns, &selected);
            ctx.chosen_columns = preset;
            ctx.was_pruned = false;
        } else if self.needs_pruning(&content) {
            let selection = self.prune(&ctx, &column_names).await;
            let selected = selection.get(&table).cloned().unwrap_or_default();
            tracing::info!(
                total = column_names.len(),
                kept = selected.len(),
                "schema pruned"
            );

            ctx.schema_description = render_reduced(&table, &columns, &selected);
            ctx.column_details = render_details(&table, &columns, &selected);
            ctx.chosen_columns = selection;
            ctx.was_pruned = true;
        } else {
            ctx.schema_description = ctx.full_schema_description().to_string();
            ctx.column_details = String::new();
            ctx.chosen_columns = ColumnSelection::from([(table.clone(), column_names)]);
            ctx.was_pruned = false;
        }

        ctx.route = Route::Decomposer;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::prompt::SELECTION_TASK;
    use crate::schema::ContentCache;
    use crate::store::SqliteStore;
    use crate::testing::{employees_store, wide_employees_table, ScriptedLlm};

    fn linker(llm: ScriptedLlm) -> SchemaLinker {
        SchemaLinker::new(Arc::new(llm), PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_narrow_table_is_not_pruned() {
        let llm = ScriptedLlm::new();
        let stage = linker(llm.clone());
        let mut session = Session::new(employees_store());
        let ctx = TaskContext::new("How many people work in Engineering?", "", "employees");

        let ctx = stage.step(ctx, &mut session).await;

        assert_eq!(ctx.route, Route::Decomposer);
        assert!(!ctx.was_pruned);
        assert_eq!(ctx.schema_description, ctx.full_schema_description());
        assert_eq!(ctx.chosen_columns["employees"].len(), 4);
        assert_eq!(
            ctx.matched_literals,
            vec!["employees.`department` = 'Engineering'".to_string()]
        );
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_wide_table_is_pruned() {
        let llm = ScriptedLlm::new().on(SELECTION_TASK, ["{\"staff\": [\"department\", \"id\"]}"]);
        let stage = linker(llm.clone());
        let store = Arc::new(SqliteStore::in_memory(&wide_employees_table()).unwrap());
        let mut session = Session::new(store);
        let ctx = TaskContext::new("How many employees are in department Research?", "", "staff");

        let ctx = stage.step(ctx, &mut session).await;

        assert!(ctx.was_pruned);
        assert_eq!(llm.calls(), 1);
        assert_eq!(ctx.schema_description, "# staff: [id (INTEGER), department (TEXT)]");
        assert!(ctx.full_schema_description().contains("(email <TEXT>"));
        assert!(ctx.column_details.contains("staff.`department`"));
        assert_eq!(
            ctx.chosen_columns["staff"],
            vec!["department".to_string(), "id".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unparseable_selection_is_tolerated() {
        let llm = ScriptedLlm::new().fallback("PLACEHOLDER");
        let stage = linker(llm);
        let store = Arc::new(SqliteStore::in_memory(&wide_employees_table()).unwrap());
        let mut session = Session::new(store);
        let ctx = TaskContext::new("Who manages Paris?", "", "staff");

        let ctx = stage.step(ctx, &mut session).await;

        assert!(ctx.was_pruned);
        assert!(ctx.chosen_columns.is_empty());
        assert_eq!(ctx.schema_description, "# staff: []");
        assert_eq!(ctx.route, Route::Decomposer);
    }

    #[tokio::test]
    async fn test_preset_selection_skips_pruning() {
        let llm = ScriptedLlm::new();
        let stage = linker(llm.clone());
        let store = Arc::new(SqliteStore::in_memory(&wide_employees_table()).unwrap());
        let mut session = Session::new(store);
        let mut ctx = TaskContext::new("Who manages Paris?", "", "staff");
        ctx.preset_selection = Some(ColumnSelection::from([(
            "staff".to_string(),
            vec!["manager".to_string(), "city".to_string()],
        )]));

        let ctx = stage.step(ctx, &mut session).await;

        assert_eq!(llm.calls(), 0);
        assert!(!ctx.was_pruned);
        assert_eq!(ctx.chosen_columns["staff"].len(), 2);
        assert!(ctx.column_details.contains("staff.`city`"));
    }

    #[tokio::test]
    async fn test_missing_table_still_routes_forward() {
        let stage = linker(ScriptedLlm::new());
        let mut session = Session::new(employees_store());
        let ctx = TaskContext::new("anything", "", "missing");

        let ctx = stage.step(ctx, &mut session).await;

        assert_eq!(ctx.route, Route::Decomposer);
        assert!(ctx.matched_literals.is_empty());
    }

    #[test]
    fn test_literals_are_capped_and_sorted() {
        let stage = SchemaLinker::new(
            Arc::new(ScriptedLlm::new()),
            PipelineConfig {
                max_matched_literals: 2,
                ..PipelineConfig::default()
            },
        );
        let store = employees_store();
        let mut cache = ContentCache::new();
        let content = cache.get_or_load(store.as_ref(), "employees").unwrap();

        let literals = stage.match_literals(
            "alice smith and bob jones from engineering and marketing",
            "employees",
            content,
        );

        assert_eq!(literals.len(), 2);
        assert!(literals[0].chars().count() >= literals[1].chars().count());
    }
}
