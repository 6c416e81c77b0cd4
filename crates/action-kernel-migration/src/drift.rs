//! Row-set comparison between an original table and its shadow

use action_kernel_storage::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Rows compared field by field when drift is found
pub const DRIFT_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRecord {
    pub table: String,
    pub shadow_table: String,
    pub old_rows: usize,
    pub new_rows: usize,
    pub drift_detected: bool,
    pub differences: Vec<String>,
}

/// Compare the original rows with the shadow rows
///
/// Drift is a row count mismatch or any structural inequality. Differences
/// list the count mismatch and a field-level diff of the first
/// [`DRIFT_SAMPLE_ROWS`] rows.
pub fn detect_drift(table: &str, shadow_table: &str, old: &[Row], new: &[Row]) -> DriftRecord {
    let drift_detected = old != new;
    let mut differences = Vec::new();

    if drift_detected {
        if old.len() != new.len() {
            differences.push(format!(
                "row_count_mismatch: {} has {} rows, {} has {}",
                table,
                old.len(),
                shadow_table,
                new.len()
            ));
        }

        for i in 0..DRIFT_SAMPLE_ROWS {
            match (old.get(i), new.get(i)) {
                (Some(a), Some(b)) => diff_row(i, a, b, &mut differences),
                (Some(_), None) => differences.push(format!("row {}: missing in {}", i, shadow_table)),
                (None, Some(_)) => differences.push(format!("row {}: extra in {}", i, shadow_table)),
                (None, None) => break,
            }
        }

        if differences.is_empty() {
            differences.push(format!(
                "rows differ beyond the first {} sampled rows",
                DRIFT_SAMPLE_ROWS
            ));
        }
    }

    DriftRecord {
        table: table.to_string(),
        shadow_table: shadow_table.to_string(),
        old_rows: old.len(),
        new_rows: new.len(),
        drift_detected,
        differences,
    }
}

fn diff_row(index: usize, old: &Row, new: &Row, out: &mut Vec<String>) {
    let columns: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for column in columns {
        match (old.get(column), new.get(column)) {
            (Some(_), None) => out.push(format!("row {}: column '{}' missing in shadow", index, column)),
            (None, Some(_)) => out.push(format!("row {}: extra column '{}' in shadow", index, column)),
            (Some(a), Some(b)) if a != b => out.push(format!(
                "row {}: column '{}' differs (original {}, shadow {})",
                index, column, a, b
            )),
            _ => {}
        }
    }
}
