pub mod sqlite;
pub mod table;

pub use sqlite::SqliteStore;
pub use table::{sqlite_friendly, TableData};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub row_count: usize,
    pub columns: Vec<ColumnInfo>,
}

/// structured outcome of one query; an empty `error` means success
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub error: String,
    pub error_class: String,
}

impl QueryResult {
    pub fn failure(error: impl Into<String>, error_class: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_class: error_class.into(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// per-task relational store
pub trait Store: Send + Sync {
    /// the table this store was built for
    fn table_name(&self) -> &str;

    fn schema(&self, table: &str) -> Result<TableSchema>;

    fn primary_keys(&self, table: &str) -> Result<Vec<String>>;

    /// every row, cells in schema column order
    fn rows(&self, table: &str) -> Result<Vec<Vec<Value>>>;

    /// never fails; errors are reported inside the result
    fn execute_query(&self, sql: &str) -> QueryResult;

    /// abandon whatever query is currently running
    fn interrupt(&self) {}

    /// release every resource; calling it again is a no-op
    fn close(&self) -> Result<()>;
}

/// closes the wrapped store when dropped, on every exit path
pub struct StoreGuard {
    store: Arc<dyn Store>,
}

impl StoreGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }
}

impl Deref for StoreGuard {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.close() {
            tracing::warn!(error = %e, "failed to close store");
        }
    }
}
