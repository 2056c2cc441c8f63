//! Configuration loading

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Untyped parameter table handed to the pluggable factories.
pub type RawParams = HashMap<String, toml::Value>;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Always stream blob bytes instead of redirecting to signed URLs.
    #[serde(default)]
    pub disable_redirect: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            bind_address: default_bind_address(),
            port: default_port(),
            disable_redirect: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub delete: DeleteConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            driver: DriverConfig::default(),
            cache: None,
            maintenance: MaintenanceConfig::default(),
            delete: DeleteConfig::default(),
        }
    }
}

/// Whether clients may delete manifests and blob links.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        DeleteConfig { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_driver")]
    pub name: String,
    #[serde(default)]
    pub params: RawParams,
    /// Cap on concurrent driver operations.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            name: default_driver(),
            params: RawParams::new(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    #[serde(default)]
    pub params: RawParams,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MaintenanceConfig {
    #[serde(default)]
    pub uploadpurging: UploadPurgingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadPurgingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sessions older than this many seconds are purged.
    #[serde(default = "default_purge_age")]
    pub age: u64,
    /// Seconds between purge passes.
    #[serde(default = "default_purge_interval")]
    pub interval: u64,
    #[serde(default)]
    pub dryrun: bool,
}

impl Default for UploadPurgingConfig {
    fn default() -> Self {
        UploadPurgingConfig {
            enabled: true,
            age: default_purge_age(),
            interval: default_purge_interval(),
            dryrun: false,
        }
    }
}

impl UploadPurgingConfig {
    pub fn to_purge_config(&self) -> ferrite_core::UploadPurgeConfig {
        ferrite_core::UploadPurgeConfig {
            enabled: self.enabled,
            age: Duration::from_secs(self.age),
            interval: Duration::from_secs(self.interval),
            dry_run: self.dryrun,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MiddlewareConfig {
    /// Storage middleware applied innermost-first.
    #[serde(default)]
    pub storage: Vec<MiddlewareEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiddlewareEntry {
    pub name: String,
    #[serde(default)]
    pub options: RawParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub scheme: String,
    #[serde(default)]
    pub params: RawParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Convert a TOML parameter table into the JSON values the factories take.
pub fn to_factory_params(raw: &RawParams) -> HashMap<String, serde_json::Value> {
    raw.iter()
        .filter_map(|(key, value)| {
            serde_json::to_value(value)
                .ok()
                .map(|value| (key.clone(), value))
        })
        .collect()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_driver() -> String {
    "filesystem".to_string()
}

fn default_max_concurrency() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_purge_age() -> u64 {
    7 * 24 * 3600
}

fn default_purge_interval() -> u64 {
    24 * 3600
}

fn default_log_level() -> String {
    "info".to_string()
}
