use crate::store::Store;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// table name -> columns in scope
pub type ColumnSelection = BTreeMap<String, Vec<String>>;

/// the stage a task context is routed to next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    SchemaLinker,
    Decomposer,
    Generator,
    Refiner,
    /// the task is finished
    Terminal,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::SchemaLinker => "schema_linker",
            Route::Decomposer => "decomposer",
            Route::Generator => "generator",
            Route::Refiner => "refiner",
            Route::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// mutable state threaded through every stage for one question
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub question: String,
    pub evidence: String,
    pub table_name: String,
    /// caller-supplied descriptions, keyed by column name
    pub column_notes: BTreeMap<String, String>,
    pub preset_selection: Option<ColumnSelection>,

    /// `table.`column` = 'value'` strings, unique, longest first
    pub matched_literals: Vec<String>,
    /// working description, reduced after pruning
    pub schema_description: String,
    full_schema_description: OnceCell<String>,
    pub column_details: String,
    pub primary_key: String,
    pub foreign_key: String,
    pub chosen_columns: ColumnSelection,
    pub was_pruned: bool,

    /// pending sub-questions; the last one is always the original question
    pub sub_questions: VecDeque<String>,
    pub last_sub_question: Option<String>,
    pub last_sub_sql: Option<String>,
    pub initial_round: bool,

    pub candidate_sql: String,
    pub was_repaired: bool,
    /// raw reply of the latest generation
    pub last_reasoning: String,
    pub last_error: Option<String>,
    pub retry_count: usize,

    pub route: Route,
}

impl TaskContext {
    pub fn new(
        question: impl Into<String>,
        evidence: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            evidence: evidence.into(),
            table_name: table_name.into(),
            column_notes: BTreeMap::new(),
            preset_selection: None,
            matched_literals: Vec::new(),
            schema_description: String::new(),
            full_schema_description: OnceCell::new(),
            column_details: String::new(),
            primary_key: String::new(),
            foreign_key: String::new(),
            chosen_columns: ColumnSelection::new(),
            was_pruned: false,
            sub_questions: VecDeque::new(),
            last_sub_question: None,
            last_sub_sql: None,
            initial_round: true,
            candidate_sql: String::new(),
            was_repaired: false,
            last_reasoning: String::new(),
            last_error: None,
            retry_count: 0,
            route: Route::SchemaLinker,
        }
    }

    /// complete description; empty until the schema linker ran
    pub fn full_schema_description(&self) -> &str {
        self.full_schema_description
            .get()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// stores the complete description; later calls are ignored
    pub fn set_full_schema_description(&mut self, description: String) -> bool {
        self.full_schema_description.set(description).is_ok()
    }

    /// head of the sub-question queue, the original question once drained
    pub fn current_sub_question(&self) -> &str {
        self.sub_questions
            .front()
            .map(String::as_str)
            .unwrap_or(&self.question)
    }
}

/// everything a caller supplies to start one task
#[derive(Clone)]
pub struct TaskRequest {
    pub question: String,
    pub evidence: String,
    /// defaults to the store's own table when empty
    pub table: String,
    pub preset_selection: Option<ColumnSelection>,
    pub column_notes: BTreeMap<String, String>,
    pub store: Arc<dyn Store>,
}

impl TaskRequest {
    pub fn new(question: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            question: question.into(),
            evidence: String::new(),
            table: String::new(),
            preset_selection: None,
            column_notes: BTreeMap::new(),
            store,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_preset_selection(mut self, selection: ColumnSelection) -> Self {
        self.preset_selection = Some(selection).filter(|s| !s.is_empty());
        self
    }

    pub fn with_column_notes(mut self, notes: BTreeMap<String, String>) -> Self {
        self.column_notes = notes;
        self
    }

    pub fn context(&self) -> TaskContext {
        let table = if self.table.is_empty() {
            self.store.table_name().to_string()
        } else {
            self.table.clone()
        };

        let mut ctx = TaskContext::new(&self.question, &self.evidence, table);
        ctx.preset_selection = self.preset_selection.clone();
        ctx.column_notes = self.column_notes.clone();
        ctx
    }
}

/// what the orchestrator hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// a validated sql statement was produced
    Completed {
        sql: String,
        column_selection: ColumnSelection,
        was_pruned: bool,
        rounds: usize,
    },
    /// the round budget ran out before the task terminated
    Exhausted { rounds: usize },
}

impl TaskOutcome {
    pub fn sql(&self) -> Option<&str> {
        match self {
            TaskOutcome::Completed { sql, .. } => Some(sql),
            TaskOutcome::Exhausted { .. } => None,
        }
    }
}
