//! Parameterized statement execution
//!
//! [`StorageExecutor`] is the only path by which the registry, the migration
//! engine and the dual-reader proxy touch durable data.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};

/// A single result row, keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Rows returned by a statement plus the number of rows affected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: u64,
}

impl QueryResult {
    /// Build a result from rows; the row count is the number of rows
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }

    /// Result of a statement that returned no rows
    pub fn affected(row_count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parameterized query execution against the backing store
///
/// Parameters are positional (`$1`, `$2`, ...) and passed as JSON values;
/// the executor is responsible for binding them.
#[async_trait]
pub trait StorageExecutor: Send + Sync {
    /// Name of this executor, used in logs
    fn name(&self) -> &str;

    /// Execute a statement and return its rows
    async fn query(&self, statement: &str, params: &[Value]) -> StorageResult<QueryResult>;

    /// Execute a statement for its side effect and return the affected count
    async fn execute(&self, statement: &str, params: &[Value]) -> StorageResult<u64> {
        Ok(self.query(statement, params).await?.row_count)
    }
}

/// In-memory executor for tests and local runs
///
/// It understands just enough SQL to be useful as a fixture:
/// `SELECT ... FROM <table>` returns every row of the table (no filtering),
/// and `INSERT INTO <table> ... ($1)` with a single JSON object parameter
/// appends that object as a row. Every statement is recorded, and statements
/// containing a registered failure pattern fail.
pub struct MemoryExecutor {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    statements: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    select_re: Regex,
    insert_re: Regex,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            statements: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            select_re: Regex::new(r#"(?is)^\s*select\s+.+?\s+from\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#)
                .expect("static regex"),
            insert_re: Regex::new(r#"(?is)^\s*insert\s+into\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#)
                .expect("static regex"),
        }
    }

    /// Seed a table with rows, replacing any existing content
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.put_table(table, rows);
        self
    }

    /// Replace the content of a table
    pub fn put_table(&self, table: impl Into<String>, rows: Vec<Row>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(table.into(), rows);
        }
    }

    /// Current rows of a table
    pub fn table(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .map(|t| t.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Make every statement containing `pattern` fail
    pub fn fail_when_contains(&self, pattern: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(pattern.into());
        }
    }

    /// All statements executed so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, statement: &str) {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(statement.to_string());
        }
    }

    fn should_fail(&self, statement: &str) -> Option<String> {
        self.failures
            .lock()
            .ok()
            .and_then(|f| f.iter().find(|p| statement.contains(p.as_str())).cloned())
    }
}

#[async_trait]
impl StorageExecutor for MemoryExecutor {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, statement: &str, params: &[Value]) -> StorageResult<QueryResult> {
        self.record(statement);

        if let Some(pattern) = self.should_fail(statement) {
            return Err(StorageError::query_failed(format!(
                "injected failure for statements containing '{}'",
                pattern
            )));
        }

        if let Some(caps) = self.select_re.captures(statement) {
            let rows = self.table(&caps[1]);
            return Ok(QueryResult::from_rows(rows));
        }

        if let Some(caps) = self.insert_re.captures(statement) {
            if let [Value::Object(row)] = params {
                let mut tables = self
                    .tables
                    .write()
                    .map_err(|_| StorageError::unavailable("table lock poisoned"))?;
                tables.entry(caps[1].to_string()).or_default().push(row.clone());
                return Ok(QueryResult::affected(1));
            }
        }

        tracing::trace!(statement = statement, "memory executor accepted statement");
        Ok(QueryResult::affected(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_select_returns_table_rows() {
        let exec = MemoryExecutor::new().with_table(
            "customers",
            vec![row(json!({"id": 1})), row(json!({"id": 2}))],
        );

        let result = exec
            .query("SELECT * FROM customers WHERE tenant_id = $1", &[json!("t1")])
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[1]["id"], json!(2));
    }

    #[tokio::test]
    async fn test_quoted_table_and_unknown_table() {
        let exec = MemoryExecutor::new().with_table("orders", vec![row(json!({"id": 7}))]);

        let result = exec.query(r#"select id from "orders""#, &[]).await.unwrap();
        assert_eq!(result.rows.len(), 1);

        let result = exec.query("SELECT * FROM missing", &[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_insert_appends_object_param() {
        let exec = MemoryExecutor::new();
        let affected = exec
            .execute("INSERT INTO entities (payload) VALUES ($1)", &[json!({"urn": "a"})])
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(exec.table("entities").len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection_and_recording() {
        let exec = MemoryExecutor::new();
        exec.fail_when_contains("DROP COLUMN");

        assert!(exec.execute("ALTER TABLE t ADD COLUMN a TEXT", &[]).await.is_ok());
        let err = exec.execute("ALTER TABLE t DROP COLUMN a", &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::QueryFailed(_)));
        assert_eq!(exec.statements().len(), 2);
    }
}
