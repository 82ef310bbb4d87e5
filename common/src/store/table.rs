use crate::error::{MagSqlError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

static NON_WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").unwrap());

const DEFAULT_TABLE_NAME: &str = "table_name";

/// one relational table as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub title: Option<String>,
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl TableData {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let table: TableData = serde_json::from_str(&text)?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        if self.header.is_empty() {
            return Err(MagSqlError::Store("table has no columns".to_string()));
        }
        if let Some((idx, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.header.len())
        {
            return Err(MagSqlError::Store(format!(
                "row {} has {} cells, expected {}",
                idx,
                row.len(),
                self.header.len()
            )));
        }
        Ok(())
    }

    /// sqlite-friendly table name derived from the title
    pub fn table_name(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => sqlite_friendly(title),
            _ => DEFAULT_TABLE_NAME.to_string(),
        }
    }

    /// sqlite-friendly, unique column names in header order
    pub fn column_names(&self) -> Vec<String> {
        dedupe_columns(self.header.iter().map(|h| sqlite_friendly(h)).collect())
    }

    /// storage class for every column, inferred from its non-null cells
    pub fn column_types(&self) -> Vec<&'static str> {
        (0..self.header.len())
            .map(|idx| infer_column_type(self.rows.iter().map(|row| &row[idx])))
            .collect()
    }
}

pub fn sqlite_friendly(name: &str) -> String {
    if name.is_empty() {
        return "_unnamed".to_string();
    }
    let cleaned = NON_WORD_REGEX.replace_all(name, "_").to_string();
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{}", cleaned),
        _ => cleaned,
    }
}

/// later duplicates get `_1`, `_2`, ... suffixes; sqlite compares names
/// case-insensitively so duplicates are detected the same way
fn dedupe_columns(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 1;
        while seen.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}", name, suffix);
            suffix += 1;
        }
        seen.insert(candidate.to_lowercase());
        out.push(candidate);
    }

    out
}

fn infer_column_type<'a>(cells: impl Iterator<Item = &'a Value>) -> &'static str {
    let mut all_integer = true;
    let mut all_number = true;
    let mut any = false;

    for cell in cells {
        match cell {
            Value::Null => continue,
            Value::Number(n) => {
                any = true;
                if !(n.is_i64() || n.is_u64()) {
                    all_integer = false;
                }
            }
            Value::Bool(_) => any = true,
            _ => {
                any = true;
                all_integer = false;
                all_number = false;
            }
        }
    }

    match (any, all_integer, all_number) {
        (false, _, _) => "TEXT",
        (true, true, _) => "INTEGER",
        (true, false, true) => "REAL",
        _ => "TEXT",
    }
}
