//! Dual-reader proxy
//!
//! Wraps a storage executor. Reads against a table under dual-write are
//! issued twice, once against the original table and once against its
//! shadow, and the two results are compared. The caller always receives the
//! original result; the comparison only feeds events and the audit trail.

use action_kernel_audit::AuditQueue;
use action_kernel_storage::{QueryResult, Row, StorageExecutor, StorageResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::drift::{detect_drift, DriftRecord};
use crate::dual_write::DualWriteRegistry;

pub const DEFAULT_SHADOW_SUFFIX: &str = "_shadow";

/// Event published when a dual read finds drift
pub const DRIFT_EVENT: &str = "migration.drift_detected";

const DRIFT_AUDIT_ACTION: &str = "migration.detect.drift";

pub struct DualReaderProxy {
    inner: Arc<dyn StorageExecutor>,
    dual_writes: Arc<DualWriteRegistry>,
    audit: AuditQueue,
    shadow_suffix: String,
    table_re: Regex,
}

impl DualReaderProxy {
    pub fn new(inner: Arc<dyn StorageExecutor>, dual_writes: Arc<DualWriteRegistry>, audit: AuditQueue) -> Self {
        Self {
            inner,
            dual_writes,
            audit,
            shadow_suffix: DEFAULT_SHADOW_SUFFIX.to_string(),
            table_re: table_pattern(),
        }
    }

    pub fn with_shadow_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.shadow_suffix = suffix.into();
        self
    }

    pub fn shadow_table(&self, table: &str) -> String {
        format!("{}{}", table, self.shadow_suffix)
    }

    /// Table read by a SELECT statement
    fn read_table<'s>(&self, statement: &'s str) -> Option<&'s str> {
        self.table_re
            .captures(statement)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Run the original and shadow reads concurrently and compare them
    pub async fn dual_read(&self, table: &str, statement: &str, params: &[Value]) -> StorageResult<QueryResult> {
        let shadow_table = self.shadow_table(table);
        let shadow_statement = rename_table(statement, table, &shadow_table);

        let (original, shadow) = futures::join!(
            self.inner.query(statement, params),
            self.inner.query(&shadow_statement, params)
        );

        let old_rows: &[Row] = match &original {
            Ok(result) => result.rows.as_slice(),
            Err(e) => {
                tracing::warn!(table = table, error = %e, "Original read failed during dual read");
                &[]
            }
        };
        let new_rows: &[Row] = match &shadow {
            Ok(result) => result.rows.as_slice(),
            Err(e) => {
                tracing::warn!(table = %shadow_table, error = %e, "Shadow read failed during dual read");
                &[]
            }
        };

        let record = detect_drift(table, &shadow_table, old_rows, new_rows);
        if record.drift_detected {
            self.report(&record).await;
        }
        original
    }

    async fn report(&self, record: &DriftRecord) {
        tracing::warn!(
            table = %record.table,
            shadow_table = %record.shadow_table,
            old_rows = record.old_rows,
            new_rows = record.new_rows,
            differences = ?record.differences,
            "Drift detected"
        );

        let payload = json!(record);
        if let Err(e) = self.audit.publish(DRIFT_EVENT, payload.clone()).await {
            tracing::warn!(table = %record.table, error = %e, "Drift event dropped");
        }
        if let Err(e) = self
            .audit
            .append(None, "system:dual-reader", DRIFT_AUDIT_ACTION, payload)
            .await
        {
            tracing::warn!(table = %record.table, error = %e, "Drift audit entry dropped");
        }
    }
}

#[async_trait]
impl StorageExecutor for DualReaderProxy {
    fn name(&self) -> &str {
        "dual-reader"
    }

    async fn query(&self, statement: &str, params: &[Value]) -> StorageResult<QueryResult> {
        match self.read_table(statement) {
            Some(table) if self.dual_writes.is_active(table) => self.dual_read(table, statement, params).await,
            _ => self.inner.query(statement, params).await,
        }
    }
}

fn table_pattern() -> Regex {
    Regex::new(r#"(?is)^\s*select\s.+?\sfrom\s+"?([A-Za-z_][A-Za-z0-9_]*)"?"#).expect("static regex")
}

/// Replace whole-word occurrences of `table` with `shadow`
fn rename_table(statement: &str, table: &str, shadow: &str) -> String {
    match Regex::new(&format!(r#"\b{}\b"#, regex::escape(table))) {
        Ok(re) => re.replace_all(statement, regex::NoExpand(shadow)).into_owned(),
        Err(_) => statement.replacen(table, shadow, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_table_whole_words_only() {
        assert_eq!(
            rename_table("SELECT * FROM orders o JOIN orders_items i ON o.id = i.order_id", "orders", "orders_shadow"),
            "SELECT * FROM orders_shadow o JOIN orders_items i ON o.id = i.order_id"
        );
        assert_eq!(
            rename_table(r#"select id from "orders""#, "orders", "orders_shadow"),
            r#"select id from "orders_shadow""#
        );
    }
}
