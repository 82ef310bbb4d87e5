use crate::error::{MagSqlError, Result};
use crate::store::table::TableData;
use crate::store::{ColumnInfo, QueryResult, Store, TableSchema};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, InterruptHandle};
use serde_json::{Number, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// isolated sqlite database holding a single table
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    interrupt: InterruptHandle,
    table_name: String,
    path: Option<PathBuf>,
    closed: AtomicBool,
}

impl SqliteStore {
    /// build the table in a fresh temp-file database, removed on close
    pub fn open_temp(table: &TableData) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("magsql-{}.db", Uuid::new_v4()));
        let conn = Connection::open(&path)?;
        Self::with_table(conn, table, Some(path))
    }

    pub fn in_memory(table: &TableData) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_table(conn, table, None)
    }

    fn with_table(mut conn: Connection, table: &TableData, path: Option<PathBuf>) -> Result<Self> {
        table.validate()?;

        let table_name = table.table_name();
        let columns = table.column_names();
        let types = table.column_types();

        let column_defs: Vec<String> = columns
            .iter()
            .zip(&types)
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
            .collect();

        let tx = conn.transaction()?;
        tx.execute(
            &format!("CREATE TABLE {} ({})", quote_ident(&table_name), column_defs.join(", ")),
            [],
        )?;
        {
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                quote_ident(&table_name),
                placeholders
            ))?;
            for row in &table.rows {
                insert.execute(params_from_iter(row.iter().map(json_to_sql)))?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            table = %table_name,
            columns = columns.len(),
            rows = table.rows.len(),
            "sqlite store created"
        );

        let interrupt = conn.get_interrupt_handle();
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            interrupt,
            table_name,
            path,
            closed: AtomicBool::new(false),
        })
    }

    fn remove_file(&self) -> Result<()> {
        match &self.path {
            Some(path) if path.exists() => Ok(std::fs::remove_file(path)?),
            _ => Ok(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| MagSqlError::Store("connection lock poisoned".to_string()))
    }

    fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<(Vec<String>, Vec<Vec<Value>>)> {
        let mut stmt = conn.prepare(sql)?;
        let header: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let width = header.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(sql_to_json(row.get_ref(idx)?));
            }
            out.push(cells);
        }

        Ok((header, out))
    }
}

impl Store for SqliteStore {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn schema(&self, table: &str) -> Result<TableSchema> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| MagSqlError::Store("store is closed".to_string()))?;

        let row_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| {
                let data_type: String = row.get("type")?;
                Ok(ColumnInfo {
                    name: row.get("name")?,
                    data_type: if data_type.is_empty() {
                        "UNKNOWN".to_string()
                    } else {
                        data_type
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(TableSchema {
            row_count: row_count.max(0) as usize,
            columns,
        })
    }

    fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| MagSqlError::Store("store is closed".to_string()))?;

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let keys = stmt
            .query_map([], |row| {
                let name: String = row.get("name")?;
                let pk: i64 = row.get("pk")?;
                Ok((name, pk))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(name, _)| name)
            .collect();

        Ok(keys)
    }

    fn rows(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| MagSqlError::Store("store is closed".to_string()))?;

        let (_, rows) = Self::run_query(conn, &format!("SELECT * FROM {}", quote_ident(table)))?;
        Ok(rows)
    }

    #[tracing::instrument(skip(self, sql), fields(sql_len = sql.len()))]
    fn execute_query(&self, sql: &str) -> QueryResult {
        let guard = match self.lock() {
            Ok(guard) => guard,
            Err(e) => return QueryResult::failure(e.to_string(), "StoreError"),
        };
        let Some(conn) = guard.as_ref() else {
            return QueryResult::failure("store is closed", "StoreClosed");
        };

        match Self::run_query(conn, sql) {
            Ok((header, rows)) => {
                tracing::debug!(rows = rows.len(), "query executed");
                QueryResult {
                    header,
                    rows,
                    error: String::new(),
                    error_class: String::new(),
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "query failed");
                QueryResult::failure(e.to_string(), error_class(&e))
            }
        }
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // interrupt first so a query still running on a blocking thread
        // releases the lock
        self.interrupt.interrupt();

        let closed = self.lock().and_then(|mut guard| match guard.take() {
            Some(conn) => conn.close().map_err(|(_, e)| MagSqlError::Sqlite(e)),
            None => Ok(()),
        });
        let removed = self.remove_file();

        tracing::debug!(table = %self.table_name, "sqlite store closed");
        // the file goes on every path; the first error wins
        closed.and(removed)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close sqlite store");
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn error_class(e: &rusqlite::Error) -> &'static str {
    match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::OperationInterrupted => {
            "Interrupted"
        }
        rusqlite::Error::SqliteFailure(..) => "SqliteFailure",
        rusqlite::Error::InvalidColumnType(..) => "InvalidColumnType",
        rusqlite::Error::MultipleStatement => "MultipleStatement",
        _ => "SqliteError",
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
    }
}
