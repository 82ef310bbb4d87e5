use crate::error::{MagSqlError, Result};
use crate::store::{Store, TableSchema};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// everything the schema linker reads from one table
#[derive(Debug, Clone, Default)]
pub struct TableContent {
    pub schema: TableSchema,
    pub primary_keys: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// distinct non-empty values of text columns that hold more than numbers
    pub text_values: BTreeMap<String, Vec<String>>,
}

impl TableContent {
    pub fn column_names(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// distinct non-empty cells of one column, in row order
    pub fn distinct_values(&self, column_idx: usize) -> Vec<&Value> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(column_idx))
            .filter(|cell| !is_empty_cell(cell))
            .filter(|cell| seen.insert(cell.to_string()))
            .collect()
    }
}

/// per-run cache of table contents, so each table is scanned once
#[derive(Debug, Default)]
pub struct ContentCache {
    tables: HashMap<String, TableContent>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// cached content for the table, scanning the store on first use
    pub fn get_or_load(&mut self, store: &dyn Store, table: &str) -> Result<&TableContent> {
        if !self.tables.contains_key(table) {
            let content = scan_table(store, table)?;
            self.insert(table, content);
        }
        Ok(&self.tables[table])
    }

    /// like `get_or_load`, scanning on a blocking thread
    pub async fn load(&mut self, store: Arc<dyn Store>, table: &str) -> Result<&TableContent> {
        if !self.tables.contains_key(table) {
            let name = table.to_string();
            let content = tokio::task::spawn_blocking(move || scan_table(store.as_ref(), &name))
                .await
                .map_err(|e| MagSqlError::Join(e.to_string()))??;
            self.insert(table, content);
        }
        Ok(&self.tables[table])
    }

    fn insert(&mut self, table: &str, content: TableContent) {
        tracing::debug!(
            table,
            rows = content.rows.len(),
            text_columns = content.text_values.len(),
            "table content cached"
        );
        self.tables.insert(table.to_string(), content);
    }

    pub fn evict(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

fn is_empty_cell(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scan_table(store: &dyn Store, table: &str) -> Result<TableContent> {
    let schema = store.schema(table)?;
    let primary_keys = store.primary_keys(table)?;
    let rows = store.rows(table)?;

    let mut content = TableContent {
        schema,
        primary_keys,
        rows,
        text_values: BTreeMap::new(),
    };

    for (idx, column) in content.schema.columns.iter().enumerate() {
        if !column.data_type.eq_ignore_ascii_case("TEXT") {
            continue;
        }

        let values: Vec<String> = content
            .distinct_values(idx)
            .into_iter()
            .map(cell_text)
            .collect();

        let has_words = values
            .iter()
            .any(|v| !v.chars().all(|c| c.is_ascii_digit()));
        if has_words {
            content.text_values.insert(column.name.clone(), values);
        }
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::testing::employees_store;
    use crate::store::TableData;
    use serde_json::json;

    #[test]
    fn test_cache_scans_text_columns_once() {
        let store = employees_store();
        let mut cache = ContentCache::new();

        let content = cache.get_or_load(store.as_ref(), "employees").unwrap();
        assert_eq!(content.rows.len(), 3);
        assert_eq!(
            content.text_values.get("department").unwrap(),
            &vec!["Engineering".to_string(), "Marketing".to_string()]
        );
        assert!(!content.text_values.contains_key("salary"));
        assert!(cache.contains("employees"));

        cache.evict("employees");
        assert!(!cache.contains("employees"));
    }

    #[tokio::test]
    async fn test_async_load_scans_off_the_runtime_once() {
        let store = employees_store();
        let mut cache = ContentCache::new();

        let content = cache.load(store.clone(), "employees").await.unwrap();
        assert_eq!(content.rows.len(), 3);
        assert!(cache.contains("employees"));

        // served from the cache once the store is gone
        store.close().unwrap();
        let content = cache.load(store.clone(), "employees").await.unwrap();
        assert_eq!(content.schema.columns.len(), 4);

        assert!(cache.load(employees_store(), "nope").await.is_err());
    }

    #[test]
    fn test_numeric_text_columns_are_skipped() {
        let table = TableData {
            title: Some("codes".to_string()),
            header: vec!["zip".to_string(), "city".to_string()],
            rows: vec![
                vec![json!("02139"), json!("Cambridge")],
                vec![json!("10001"), json!("")],
            ],
        };
        let store = SqliteStore::in_memory(&table).unwrap();
        let mut cache = ContentCache::new();

        let content = cache.get_or_load(&store, "codes").unwrap();
        assert!(!content.text_values.contains_key("zip"));
        assert_eq!(content.text_values["city"], vec!["Cambridge".to_string()]);
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let store = employees_store();
        let mut cache = ContentCache::new();
        assert!(cache.get_or_load(store.as_ref(), "nope").is_err());
        cache.clear();
    }
}
