//! `action-kernel` command line
//!
//! - `serve` runs the HTTP surface.
//! - `analyze` prints the migration plan between two object descriptors.
//! - `check-schema` compiles a descriptor and reports why it is rejected.

use action_kernel_migration::{MigrationAnalyzer, MigrationPlan};
use action_kernel_schema::{describe_fields, FieldDescriptor, SchemaNode, Validator};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::config::{ConfigOverrides, KernelConfig};
use crate::error::{ServerError, ServerResult};

#[derive(Parser, Debug)]
#[command(name = "action-kernel")]
#[command(about = "Action contract kernel - dispatch, policy and schema migration", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "ACTION_KERNEL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve,

    /// Plan the migration of an entity between two descriptors
    Analyze {
        /// Entity (table) name
        #[arg(short, long)]
        entity: String,

        /// Current object descriptor (JSON)
        #[arg(long)]
        old: PathBuf,

        /// Target object descriptor (JSON)
        #[arg(long)]
        new: PathBuf,
    },

    /// Compile a schema descriptor and report problems
    CheckSchema {
        /// Descriptor file (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },
}

impl Cli {
    /// Configuration file merged with flag and environment overrides
    pub fn kernel_config(&self) -> ServerResult<KernelConfig> {
        let mut config = KernelConfig::load(self.config.as_deref())?;
        config.apply(&self.overrides)?;
        Ok(config)
    }
}

/// Result of `check-schema`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

pub fn read_json(path: &Path) -> ServerResult<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ServerError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn check_schema(descriptor: &Value) -> SchemaReport {
    let compiled = SchemaNode::parse(descriptor).and_then(|node| Validator::compile(&node).map(|_| node));
    match compiled {
        Ok(node) => SchemaReport {
            valid: true,
            error_code: None,
            path: None,
            message: None,
            fields: describe_fields(&node),
        },
        Err(e) => SchemaReport {
            valid: false,
            error_code: Some("CONTRACT_INVALID"),
            path: Some(e.path().to_string()),
            message: Some(e.to_string()),
            fields: Vec::new(),
        },
    }
}

pub fn analyze(config: &KernelConfig, entity: &str, old: &Path, new: &Path) -> anyhow::Result<MigrationPlan> {
    let old = read_json(old)?;
    let new = read_json(new)?;
    let plan = MigrationAnalyzer::new(config.migration_settings()).analyze(entity, &old, &new)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "action-kernel",
            "--grace-period-days",
            "2",
            "analyze",
            "--entity",
            "customers",
            "--old",
            "old.json",
            "--new",
            "new.json",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Analyze { ref entity, .. } if entity == "customers"));
        assert_eq!(cli.kernel_config().unwrap().migration.grace_period_days, 2);
    }

    #[test]
    fn test_check_schema_reports_path() {
        let report = check_schema(&json!({
            "type": "object",
            "definition": {"shape": {"kind": {"type": "union", "definition": {"options": [{"type": "string"}]}}}}
        }));
        assert!(!report.valid);
        assert_eq!(report.error_code, Some("CONTRACT_INVALID"));
        assert!(report.path.unwrap().contains("kind"));

        let report = check_schema(&json!({
            "type": "object",
            "definition": {"shape": {"id": {"type": "string"}, "note": {"type": "optional", "definition": {"inner": {"type": "string"}}}}}
        }));
        assert!(report.valid);
        assert_eq!(report.fields.len(), 2);
        assert!(report.fields[0].required);
        assert!(!report.fields[1].required);
    }

    #[test]
    fn test_analyze_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.json");
        let new = dir.path().join("new.json");
        std::fs::write(&old, r#"{"type":"object","definition":{"shape":{"id":{"type":"string"}}}}"#).unwrap();
        std::fs::write(
            &new,
            r#"{"type":"object","definition":{"shape":{"id":{"type":"string"},"email":{"type":"string"}}}}"#,
        )
        .unwrap();

        let plan = analyze(&KernelConfig::default(), "customers", &old, &new).unwrap();
        assert_eq!(plan.change_labels(), vec!["new_required_field:email"]);

        assert!(analyze(&KernelConfig::default(), "customers", &dir.path().join("missing.json"), &new).is_err());
    }
}
