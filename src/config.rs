use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::models::{NewAlertRule, NewNode, NewNotificationChannel, NewService, NewWebhook};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitorix.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub nodes: Option<Vec<NewNode>>,
    pub services: Option<Vec<NewService>>,
    pub alert_rules: Option<Vec<NewAlertRule>>,
    pub webhooks: Option<Vec<NewWebhook>>,
    pub notification_channels: Option<Vec<NewNotificationChannel>>,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    /// Email notifications (optional - disabled when absent)
    pub email: Option<EmailConfig>,

    #[serde(default)]
    pub proxmox: ProxmoxConfig,

    #[serde(default)]
    pub api: ApiSettings,
}

/// Periodic job intervals
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub node_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub service_interval_secs: u64,
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn node_interval(&self) -> Duration {
        Duration::from_secs(self.node_interval_secs.max(1))
    }

    pub fn service_interval(&self) -> Duration {
        Duration::from_secs(self.service_interval_secs.max(1))
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            node_interval_secs: default_poll_interval(),
            service_interval_secs: default_poll_interval(),
            retention_interval_secs: default_retention_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_retention_interval() -> u64 {
    24 * 60 * 60
}

/// Metric pruning
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metric samples older than this are deleted
    #[serde(default = "default_retention_days")]
    pub metrics_retention_days: u32,

    /// Health check results older than this are deleted along with the
    /// metrics; kept forever when absent
    pub health_check_retention_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_retention_days: default_retention_days(),
            health_check_retention_days: None,
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub from: Option<String>,
    /// Single recipient of alert mails
    pub to: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProxmoxConfig {
    /// Deadline for every Proxmox API call
    #[serde(default = "default_proxmox_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_proxmox_timeout(),
        }
    }
}

fn default_proxmox_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "crate::util::get_default_api_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    /// Bearer token required by the API; open when absent
    pub auth_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind_addr: crate::util::get_default_api_addr(),
            enable_cors: true,
            auth_token: None,
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config: &Config| {
            trace!(
                "loaded config with {} nodes and {} services",
                config.nodes.as_ref().map_or(0, Vec::len),
                config.services.as_ref().map_or(0, Vec::len)
            )
        })
}
