//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::FieldId;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "polisportiva", "fieldbook")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "fieldbook".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// HTTP API port (also serves /metrics and /health)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// JSONL snapshot file, loaded at boot and rewritten on every
    /// mutation; empty means in-memory only
    #[serde(default)]
    pub snapshot_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpsConfig {
    /// Deadline for storage-touching operations
    #[serde(default = "default_ops_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self { timeout_ms: default_ops_timeout_ms() }
    }
}

fn default_ops_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Run the periodic sweep/auto-confirm task
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Interval between runs (seconds)
    #[serde(default = "default_scheduler_interval")]
    pub interval_secs: u64,
    /// Pending bookings older than this are confirmed by tacit consent
    #[serde(default = "default_auto_confirm_days")]
    pub auto_confirm_days: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_secs: default_scheduler_interval(),
            auto_confirm_days: default_auto_confirm_days(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_interval() -> u64 {
    300
}

fn default_auto_confirm_days() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FieldsConfig {
    /// Field id to display name mapping (e.g., "1" = "Campo Centrale")
    #[serde(default)]
    pub names: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ops: OpsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_port: u16,
    snapshot_file: String,
    ops_timeout_ms: u64,
    scheduler_enabled: bool,
    scheduler_interval_secs: u64,
    auto_confirm_days: u64,
    field_names: HashMap<i32, String>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: "fieldbook".to_string(),
            http_port: 8080,
            snapshot_file: String::new(),
            ops_timeout_ms: 5000,
            scheduler_enabled: true,
            scheduler_interval_secs: 300,
            auto_confirm_days: 3,
            field_names: HashMap::new(),
            metrics_interval_secs: 60,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        // Convert field names from string keys to i32 keys
        let mut field_names = HashMap::new();
        for (key, value) in toml_config.fields.names {
            if let Ok(id) = key.parse::<i32>() {
                field_names.insert(id, value);
            }
        }

        Ok(Self {
            site_id: toml_config.site.id,
            http_port: toml_config.http.port,
            snapshot_file: toml_config.store.snapshot_file,
            ops_timeout_ms: toml_config.ops.timeout_ms,
            scheduler_enabled: toml_config.scheduler.enabled,
            scheduler_interval_secs: toml_config.scheduler.interval_secs,
            auto_confirm_days: toml_config.scheduler.auto_confirm_days,
            field_names,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - resolves the path, then tries the TOML file
    /// first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Get a field display name, with a fallback for unknown ids
    pub fn field_name(&self, field_id: FieldId) -> String {
        self.field_names
            .get(&field_id.0)
            .cloned()
            .unwrap_or_else(|| format!("FIELD_{}", field_id.0))
    }

    /// The configured field catalog (id to display name)
    pub fn field_catalog(&self) -> &HashMap<i32, String> {
        &self.field_names
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn snapshot_file(&self) -> Option<&str> {
        if self.snapshot_file.is_empty() {
            None
        } else {
            Some(&self.snapshot_file)
        }
    }

    pub fn ops_timeout_ms(&self) -> u64 {
        self.ops_timeout_ms
    }

    pub fn scheduler_enabled(&self) -> bool {
        self.scheduler_enabled
    }

    pub fn scheduler_interval_secs(&self) -> u64 {
        self.scheduler_interval_secs
    }

    pub fn auto_confirm_days(&self) -> u64 {
        self.auto_confirm_days
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the field catalog
    #[cfg(test)]
    pub fn with_field_names(mut self, names: HashMap<i32, String>) -> Self {
        self.field_names = names;
        self
    }
}
