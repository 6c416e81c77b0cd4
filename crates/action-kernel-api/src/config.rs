//! Kernel configuration
//!
//! Defaults, then an optional TOML file, then CLI flags and environment
//! variables. Every section may be omitted from the file.
//!
//! ```toml
//! dev_diagnostics = false
//!
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [registry]
//! cache_ttl_secs = 600
//!
//! [audit]
//! queue_size = 1000
//! max_retries = 3
//! initial_backoff_ms = 100
//!
//! [migration]
//! grace_period_days = 7
//! safety_window_days = 30
//! shadow_suffix = "_shadow"
//!
//! [logging]
//! format = "json"
//! ```

use action_kernel_audit::QueueConfig;
use action_kernel_migration::{MigrationSettings, DEFAULT_SHADOW_SUFFIX};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// TTL of cached unversioned lookups
    pub cache_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 600 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub queue_size: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            max_retries: 3,
            initial_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub grace_period_days: u32,
    pub safety_window_days: u32,
    pub shadow_suffix: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        let settings = MigrationSettings::default();
        Self {
            grace_period_days: settings.grace_period_days,
            safety_window_days: settings.safety_window_days,
            shadow_suffix: DEFAULT_SHADOW_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub audit: AuditConfig,
    pub migration: MigrationConfig,
    pub logging: LoggingConfig,
    /// Include internal diagnostics in error envelopes
    pub dev_diagnostics: bool,
}

/// Per-field overrides from the command line or environment
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Address to listen on
    #[arg(long, env = "ACTION_KERNEL_BIND")]
    pub bind: Option<String>,

    /// Registry cache TTL in seconds
    #[arg(long, env = "ACTION_KERNEL_CACHE_TTL")]
    pub cache_ttl_secs: Option<u64>,

    /// Audit queue capacity
    #[arg(long, env = "ACTION_KERNEL_AUDIT_QUEUE_SIZE")]
    pub audit_queue_size: Option<usize>,

    /// Audit delivery retries
    #[arg(long, env = "ACTION_KERNEL_AUDIT_RETRIES")]
    pub audit_retries: Option<u32>,

    /// Initial audit retry backoff in milliseconds
    #[arg(long, env = "ACTION_KERNEL_AUDIT_BACKOFF_MS")]
    pub audit_backoff_ms: Option<u64>,

    /// Dual-write grace period in days
    #[arg(long, env = "ACTION_KERNEL_GRACE_DAYS")]
    pub grace_period_days: Option<u32>,

    /// Safety window before old columns are dropped, in days
    #[arg(long, env = "ACTION_KERNEL_SAFETY_DAYS")]
    pub safety_window_days: Option<u32>,

    /// Suffix of shadow tables read during dual-write
    #[arg(long, env = "ACTION_KERNEL_SHADOW_SUFFIX")]
    pub shadow_suffix: Option<String>,

    /// Include internal diagnostics in error envelopes
    #[arg(long, env = "ACTION_KERNEL_DEV_DIAGNOSTICS")]
    pub dev_diagnostics: Option<bool>,

    /// Log output format
    #[arg(long, value_enum, env = "ACTION_KERNEL_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl KernelConfig {
    pub fn from_toml_str(content: &str) -> ServerResult<Self> {
        let config: KernelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| ServerError::io(PathBuf::from(path), e))?;
                Self::from_toml_str(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply overrides and re-validate
    pub fn apply(&mut self, overrides: &ConfigOverrides) -> ServerResult<()> {
        if let Some(bind) = &overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(ttl) = overrides.cache_ttl_secs {
            self.registry.cache_ttl_secs = ttl;
        }
        if let Some(size) = overrides.audit_queue_size {
            self.audit.queue_size = size;
        }
        if let Some(retries) = overrides.audit_retries {
            self.audit.max_retries = retries;
        }
        if let Some(backoff) = overrides.audit_backoff_ms {
            self.audit.initial_backoff_ms = backoff;
        }
        if let Some(days) = overrides.grace_period_days {
            self.migration.grace_period_days = days;
        }
        if let Some(days) = overrides.safety_window_days {
            self.migration.safety_window_days = days;
        }
        if let Some(suffix) = &overrides.shadow_suffix {
            self.migration.shadow_suffix = suffix.clone();
        }
        if let Some(enabled) = overrides.dev_diagnostics {
            self.dev_diagnostics = enabled;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
        self.validate()
    }

    pub fn validate(&self) -> ServerResult<()> {
        self.bind_addr()?;
        if self.audit.queue_size == 0 {
            return Err(ServerError::config("audit.queue_size must be positive"));
        }
        let suffix = &self.migration.shadow_suffix;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ServerError::config(format!(
                "migration.shadow_suffix '{}' must be a non-empty identifier suffix",
                suffix
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> ServerResult<SocketAddr> {
        self.server
            .bind
            .parse()
            .map_err(|e| ServerError::config(format!("invalid bind address '{}': {}", self.server.bind, e)))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.registry.cache_ttl_secs)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_queue_size(self.audit.queue_size)
            .with_retry(self.audit.max_retries, self.audit.initial_backoff_ms)
    }

    pub fn migration_settings(&self) -> MigrationSettings {
        MigrationSettings {
            grace_period_days: self.migration.grace_period_days,
            safety_window_days: self.migration.safety_window_days,
        }
    }
}
