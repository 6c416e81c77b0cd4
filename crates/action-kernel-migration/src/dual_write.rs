use std::collections::BTreeSet;
use std::sync::RwLock;

/// Tables currently under dual-write, shared by the engine and the dual reader.
/// Names are stored lowercased so lookups ignore case.
#[derive(Debug, Default)]
pub struct DualWriteRegistry {
    tables: RwLock<BTreeSet<String>>,
}

impl DualWriteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, table: &str) {
        if let Ok(mut tables) = self.tables.write() {
            if tables.insert(key(table)) {
                tracing::info!(table = table, "Dual-write enabled");
            }
        }
    }

    pub fn disable(&self, table: &str) {
        if let Ok(mut tables) = self.tables.write() {
            if tables.remove(&key(table)) {
                tracing::info!(table = table, "Dual-write disabled");
            }
        }
    }

    pub fn is_active(&self, table: &str) -> bool {
        self.tables.read().map(|t| t.contains(&key(table))).unwrap_or(false)
    }

    pub fn tables(&self) -> Vec<String> {
        self.tables
            .read()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn key(table: &str) -> String {
    table.to_ascii_lowercase()
}
