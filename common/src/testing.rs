//! test doubles shared by the unit tests of several modules

use crate::error::{MagSqlError, Result};
use crate::llm::{Completion, CompletionOptions, CompletionService};
use crate::store::{SqliteStore, TableData};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Mode {
    Scripted,
    Failing(String),
    Overflowing,
}

#[derive(Default)]
struct Script {
    rules: Vec<(String, VecDeque<String>)>,
    fallback: String,
    prompts: Vec<String>,
}

/// completion service returning canned replies picked by prompt markers.
///
/// the first rule whose marker occurs in the prompt answers; its replies are
/// consumed in order and the last one repeats.
#[derive(Clone)]
pub struct ScriptedLlm {
    mode: Mode,
    script: Arc<Mutex<Script>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            mode: Mode::Scripted,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            mode: Mode::Failing(message.to_string()),
            ..Self::new()
        }
    }

    pub fn overflowing() -> Self {
        Self {
            mode: Mode::Overflowing,
            ..Self::new()
        }
    }

    pub fn on<I, S>(self, marker: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script
            .lock()
            .unwrap()
            .rules
            .push((marker.to_string(), replies.into_iter().map(Into::into).collect()));
        self
    }

    pub fn fallback(self, reply: &str) -> Self {
        self.script.lock().unwrap().fallback = reply.to_string();
        self
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().prompts.clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<Vec<Completion>> {
        let mut script = self.script.lock().unwrap();
        script.prompts.push(prompt.to_string());

        match &self.mode {
            Mode::Failing(message) => return Err(MagSqlError::Completion(message.clone())),
            Mode::Overflowing => {
                return Err(MagSqlError::ContextOverflow(
                    "This model's maximum context length is 4096 tokens".to_string(),
                ))
            }
            Mode::Scripted => {}
        }

        for (marker, replies) in script.rules.iter_mut() {
            if prompt.contains(marker.as_str()) {
                let reply = if replies.len() > 1 {
                    replies.pop_front().unwrap_or_default()
                } else {
                    replies.front().cloned().unwrap_or_default()
                };
                return Ok(vec![Completion::text(reply)]);
            }
        }

        Ok(vec![Completion::text(script.fallback.clone())])
    }
}

/// small employee table with three text columns
pub fn employees_table() -> TableData {
    TableData {
        title: Some("employees".to_string()),
        header: vec![
            "id".to_string(),
            "name".to_string(),
            "department".to_string(),
            "salary".to_string(),
        ],
        rows: vec![
            vec![json!(1), json!("Alice Smith"), json!("Engineering"), json!(120000)],
            vec![json!(2), json!("Bob Jones"), json!("Marketing"), json!(90000)],
            vec![json!(3), json!("Carol White"), json!("Engineering"), Value::Null],
        ],
    }
}

/// twelve column table, wide enough to trigger pruning
pub fn wide_employees_table() -> TableData {
    let header: Vec<String> = [
        "id", "name", "department", "title", "email", "phone", "city", "country",
        "hire_year", "salary", "manager", "status",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let rows = vec![
        vec![
            json!(1), json!("Alice Smith"), json!("Research"), json!("Scientist"),
            json!("alice@example.com"), json!("555-0101"), json!("Boston"), json!("USA"),
            json!(2015), json!(120000), json!("Dana"), json!("active"),
        ],
        vec![
            json!(2), json!("Bob Jones"), json!("Research"), json!("Analyst"),
            json!("bob@example.com"), json!("555-0102"), json!("Austin"), json!("USA"),
            json!(2018), json!(90000), json!("Dana"), json!("active"),
        ],
        vec![
            json!(3), json!("Carol White"), json!("Sales"), json!("Manager"),
            json!("carol@example.com"), json!("555-0103"), json!("Paris"), json!("France"),
            json!(2012), json!(110000), json!("Erin"), json!("leave"),
        ],
    ];

    TableData {
        title: Some("staff".to_string()),
        header,
        rows,
    }
}

pub fn employees_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory(&employees_table()).unwrap())
}
