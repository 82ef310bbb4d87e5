use crate::agent::parser::{add_select_prefix, count_selects, extract_sql};
use crate::agent::prompt::{nested_repair_prompt, repair_prompt, PromptInput};
use crate::config::PipelineConfig;
use crate::llm::{first_text, CompletionOptions, CompletionService};
use crate::pipeline::context::{Route, TaskContext};
use crate::pipeline::stage::{Session, Stage};
use crate::store::{QueryResult, Store};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const NO_DATA_SELECTED: &str = "no data selected";
pub const NULL_VALUE_HINT: &str =
    "exists a null value, recommend a not-null filter (add `IS NOT NULL` to the SQL)";
const NO_SUCH_COLUMN_HINT: &str = " (Check if the column in the SQL is selected from the correct table \
     based on the 【Database info】 at first, and then check if the column name is enclosed in backticks.)";

static ASC_LIMIT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bASC(\s+)LIMIT\b").unwrap()
});

/// outcome of executing one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub sql: String,
    /// `None` when execution failed
    pub rows: Option<Vec<Vec<Value>>>,
    pub error: String,
    pub error_class: String,
}

impl ExecutionRecord {
    pub fn failure(sql: &str, error: impl Into<String>, error_class: impl Into<String>) -> Self {
        Self {
            sql: sql.to_string(),
            rows: None,
            error: error.into(),
            error_class: error_class.into(),
        }
    }

    pub fn from_result(sql: &str, result: QueryResult) -> Self {
        if result.is_success() {
            Self {
                sql: sql.to_string(),
                rows: Some(result.rows),
                error: String::new(),
                error_class: String::new(),
            }
        } else {
            Self::failure(sql, result.error, result.error_class)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    /// repair with the given reason
    Refine(String),
}

impl Verdict {
    pub fn is_refine_needed(&self) -> bool {
        matches!(self, Verdict::Refine(_))
    }
}

/// decide whether a result is good enough, in priority order
pub fn check_result(record: &ExecutionRecord, retry_count: usize, max_repairs: usize) -> Verdict {
    if retry_count >= max_repairs {
        return Verdict::Accept;
    }

    let Some(rows) = &record.rows else {
        let reason = if record.error.is_empty() {
            "execution failed".to_string()
        } else {
            record.error.clone()
        };
        return Verdict::Refine(reason);
    };

    match rows.len() {
        0 => return Verdict::Refine(NO_DATA_SELECTED.to_string()),
        1 => return Verdict::Accept,
        _ => {}
    }

    let mut all_null = true;
    let mut has_null = false;
    for value in rows.iter().flatten() {
        if value.is_null() {
            has_null = true;
        } else {
            all_null = false;
        }
    }

    if has_null && !all_null {
        Verdict::Refine(NULL_VALUE_HINT.to_string())
    } else {
        Verdict::Accept
    }
}

/// cosmetic rewrites applied to accepted sql; idempotent
pub fn normalize_sql(sql: &str) -> String {
    let sql = sql.replace(" || ' ' || ", ", ");
    ASC_LIMIT_REGEX
        .replace_all(&sql, "ASC NULLS LAST${1}LIMIT")
        .into_owned()
}

/// run a query on a blocking thread, abandoning it after `timeout`
pub async fn execute_with_timeout(store: Arc<dyn Store>, sql: &str, timeout: Duration) -> ExecutionRecord {
    let query = sql.to_string();
    let worker = Arc::clone(&store);
    let handle = tokio::task::spawn_blocking(move || worker.execute_query(&query));

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => ExecutionRecord::from_result(sql, result),
        Ok(Err(e)) => ExecutionRecord::failure(sql, e.to_string(), "JoinError"),
        Err(_) => {
            store.interrupt();
            tracing::warn!(timeout_secs = timeout.as_secs(), "query timed out");
            ExecutionRecord::failure(
                sql,
                format!("query timed out after {} seconds", timeout.as_secs()),
                "Timeout",
            )
        }
    }
}

/// executes candidates and repairs them until they hold up
pub struct Refiner {
    llm: Arc<dyn CompletionService>,
    config: PipelineConfig,
    options: CompletionOptions,
}

impl Refiner {
    pub fn new(llm: Arc<dyn CompletionService>, config: PipelineConfig) -> Self {
        Self {
            llm,
            config,
            options: CompletionOptions::default(),
        }
    }

    fn accept(&self, mut ctx: TaskContext) -> TaskContext {
        let sql = normalize_sql(&ctx.candidate_sql);
        ctx.candidate_sql = sql.clone();
        ctx.last_error = None;

        if ctx.sub_questions.len() <= 1 {
            tracing::info!(sql = %sql, "final sql accepted");
            ctx.route = Route::Terminal;
        } else {
            let resolved = ctx.sub_questions.pop_front();
            tracing::info!(remaining = ctx.sub_questions.len(), "sub-question resolved");
            ctx.last_sub_question = resolved;
            ctx.last_sub_sql = Some(sql);
            ctx.retry_count = 0;
            ctx.route = Route::Generator;
        }
        ctx
    }

    /// repair prompt for the failure, and whether the complete schema is needed
    pub fn repair_request(&self, ctx: &TaskContext, record: &ExecutionRecord, reason: &str) -> (String, bool) {
        let sql = add_select_prefix(&record.sql);
        let input = PromptInput::from_context(ctx, ctx.current_sub_question());

        if reason.to_lowercase().contains("no such column") {
            let error = format!("{}{}", reason, NO_SUCH_COLUMN_HINT);
            let input = input.with_schema(ctx.full_schema_description());
            (repair_prompt(&input, &sql, &error, &record.error_class), true)
        } else if reason.contains(NO_DATA_SELECTED) && count_selects(&sql) > 1 {
            (nested_repair_prompt(&input, &sql, reason, &record.error_class), false)
        } else {
            (repair_prompt(&input, &sql, reason, &record.error_class), false)
        }
    }

    async fn refine(&self, mut ctx: TaskContext, record: &ExecutionRecord, reason: String) -> TaskContext {
        let (prompt, needs_full_schema) = self.repair_request(&ctx, record, &reason);
        if needs_full_schema {
            tracing::info!("missing column, switching to the complete schema");
            ctx.schema_description = ctx.full_schema_description().to_string();
        }

        let reply = first_text(self.llm.as_ref(), &prompt, &self.options).await;
        ctx.candidate_sql = extract_sql(&reply);
        ctx.retry_count += 1;
        ctx.was_repaired = true;
        ctx.last_error = Some(reason);
        ctx.route = Route::Refiner;
        ctx
    }
}

#[async_trait]
impl Stage for Refiner {
    fn route(&self) -> Route {
        Route::Refiner
    }

    #[tracing::instrument(skip_all, fields(stage = "refiner", retry = ctx.retry_count))]
    async fn step(&self, ctx: TaskContext, session: &mut Session) -> TaskContext {
        let record = execute_with_timeout(
            Arc::clone(&session.store),
            &ctx.candidate_sql,
            self.config.execution_timeout(),
        )
        .await;

        match check_result(&record, ctx.retry_count, self.config.max_repairs) {
            Verdict::Accept => self.accept(ctx),
            Verdict::Refine(reason) => {
                tracing::info!(reason = %reason, class = %record.error_class, "sql needs repair");
                self.refine(ctx, &record, reason).await
            }
        }
    }
}
