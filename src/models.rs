//! Records the monitoring core reads and writes.
//!
//! Every status-like string in the persisted model is an explicit enum here;
//! the string forms (`as_str`, `Display`, `FromStr`, serde) are the ones
//! stored in the database and sent over the wire.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored or configured string that does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:tt),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Last observed state of a Proxmox node
    pub enum NodeStatus {
        Unknown => "unknown",
        Online => "online",
        Offline => "offline",
        Error => "error",
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Unknown
    }
}

string_enum! {
    /// Outcome of a single health probe
    pub enum CheckStatus {
        Up => "up",
        Down => "down",
        /// A response arrived, but not the expected one
        Warning => "warning",
    }
}

string_enum! {
    pub enum MetricType {
        Cpu => "cpu",
        Memory => "memory",
        Disk => "disk",
        ResponseTime => "response_time",
    }
}

string_enum! {
    /// Threshold comparison of an alert rule
    pub enum Comparator {
        Gt => ">",
        Lt => "<",
        Ge => ">=",
        Le => "<=",
        /// Equal within 0.01
        Eq => "==",
    }
}

string_enum! {
    pub enum Severity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
}

string_enum! {
    pub enum AlertType {
        NodeDown => "node_down",
        ServiceDown => "service_down",
        HighUsage => "high_usage",
    }
}

string_enum! {
    /// Chat service a notification channel posts to
    pub enum ChannelKind {
        Slack => "slack",
        Discord => "discord",
    }
}

string_enum! {
    /// Proxmox guest flavour
    pub enum VmKind {
        Qemu => "qemu",
        Lxc => "lxc",
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Nodes and virtual machines
// ============================================================================

/// Resource usage reported for a node on its last successful poll
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeUsage {
    /// CPU usage in percent
    pub cpu_usage: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    /// Uptime in seconds
    pub uptime: u64,
}

impl NodeUsage {
    pub fn memory_percent(&self) -> f64 {
        percent(self.memory_used, self.memory_total)
    }

    pub fn disk_percent(&self) -> f64 {
        percent(self.disk_used, self.disk_total)
    }
}

/// `used / total` in percent; a zero total counts as one byte
pub fn percent(used: u64, total: u64) -> f64 {
    used as f64 / total.max(1) as f64 * 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredNode {
    pub id: i64,
    pub name: String,
    /// Base URL of the Proxmox API, e.g. `https://pve.local:8006`
    pub url: String,
    /// API user, e.g. `monitor@pve`
    pub username: String,
    /// API token in `tokenid=secret` form
    #[serde(skip_serializing)]
    pub token: String,
    pub verify_ssl: bool,
    pub is_active: bool,
    pub maintenance_mode: bool,
    pub status: NodeStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub usage: Option<NodeUsage>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredNode {
    /// Whether the scheduler may poll this node at all
    pub fn is_pollable(&self) -> bool {
        self.is_active && !self.maintenance_mode
    }
}

/// Node definition as it appears in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub url: String,
    pub username: String,
    pub token: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub maintenance_mode: bool,
}

/// What the hypervisor reports for one guest
#[derive(Debug, Clone, PartialEq)]
pub struct VmSnapshot {
    pub vmid: u32,
    pub name: Option<String>,
    pub kind: VmKind,
    /// Proxmox power state (`running`, `stopped`, ...)
    pub status: String,
    /// CPU usage in percent
    pub cpu_usage: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub uptime: u64,
}

impl VmSnapshot {
    /// Reported name, or a placeholder derived from the vmid
    pub fn display_name(&self) -> String {
        match (&self.name, self.kind) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, VmKind::Qemu) => format!("VM {}", self.vmid),
            (_, VmKind::Lxc) => format!("CT {}", self.vmid),
        }
    }

    pub fn memory_percent(&self) -> f64 {
        percent(self.memory_used, self.memory_total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualMachine {
    pub id: i64,
    pub node_id: i64,
    pub vmid: u32,
    pub name: String,
    pub kind: VmKind,
    pub status: String,
    pub cpu_usage: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub uptime: u64,
    pub last_check: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Services and health checks
// ============================================================================

fn default_expected_status() -> u16 {
    200
}

/// The single probe a service is checked with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    /// GET with redirect following; `https` urls use the same probe
    #[serde(alias = "https")]
    Http {
        url: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
    #[serde(rename = "port")]
    Tcp { host: String, port: u16 },
    Ping { host: String },
    Custom { run: CustomCheck },
}

/// What a custom check executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomCheck {
    /// A shell command line
    Command(String),
    /// Script contents, written to a temporary file before each run
    Script(String),
}

impl CheckKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            CheckKind::Http { url, .. } if url.starts_with("https://") => "https",
            CheckKind::Http { .. } => "http",
            CheckKind::Tcp { .. } => "port",
            CheckKind::Ping { .. } => "ping",
            CheckKind::Custom { .. } => "custom",
        }
    }
}

fn default_timeout() -> u64 {
    5
}

fn default_check_interval() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredService {
    pub id: i64,
    pub name: String,
    /// Proxmox vmid of the guest running the service
    pub vmid: Option<u32>,
    pub check: CheckKind,
    /// Probe deadline in seconds
    pub timeout: u64,
    /// Minimum seconds between two scheduled probes
    pub check_interval: u64,
    pub is_active: bool,
    pub maintenance_mode: bool,
    pub created_at: DateTime<Utc>,
}

impl MonitoredService {
    pub fn is_pollable(&self) -> bool {
        self.is_active && !self.maintenance_mode
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewService {
    pub name: String,
    #[serde(default, rename = "vm")]
    pub vmid: Option<u32>,
    pub check: CheckKind,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub maintenance_mode: bool,
}

/// Normalised result of one probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub response_time_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl CheckOutcome {
    pub fn up(response_time_ms: Option<f64>) -> Self {
        Self {
            status: CheckStatus::Up,
            response_time_ms,
            status_code: None,
            error_message: None,
        }
    }

    pub fn down(error_message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Down,
            response_time_ms: None,
            status_code: None,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub id: i64,
    pub service_id: i64,
    pub status: CheckStatus,
    pub response_time_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHealthCheck {
    pub service_id: i64,
    pub outcome: CheckOutcome,
    pub checked_at: DateTime<Utc>,
}

// ============================================================================
// Metrics
// ============================================================================

pub const UNIT_PERCENT: &str = "percent";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub id: i64,
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetricSample {
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
}

impl NewMetricSample {
    pub fn percent(
        metric_type: MetricType,
        value: f64,
        node_id: Option<i64>,
        vm_id: Option<i64>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id,
            vm_id,
            metric_type,
            value,
            unit: UNIT_PERCENT.to_string(),
            recorded_at,
        }
    }
}

// ============================================================================
// Rules and alerts
// ============================================================================

fn default_cooldown() -> i64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub metric_type: MetricType,
    pub comparator: Comparator,
    pub threshold: f64,
    pub severity: Severity,
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub service_id: Option<i64>,
    pub cooldown_minutes: i64,
    pub is_active: bool,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub metric_type: MetricType,
    #[serde(rename = "operator")]
    pub comparator: Comparator,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default)]
    pub node_id: Option<i64>,
    #[serde(default)]
    pub vm_id: Option<i64>,
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Identity of one continuous incident: at most one unresolved alert per key.
///
/// Absent ids are significant; a global key never equals a node-scoped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub alert_type: AlertType,
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub service_id: Option<i64>,
}

impl AlertKey {
    pub fn node_down(node_id: i64) -> Self {
        Self {
            alert_type: AlertType::NodeDown,
            node_id: Some(node_id),
            vm_id: None,
            service_id: None,
        }
    }

    pub fn service_down(service_id: i64) -> Self {
        Self {
            alert_type: AlertType::ServiceDown,
            node_id: None,
            vm_id: None,
            service_id: Some(service_id),
        }
    }

    pub fn high_usage(node_id: Option<i64>, vm_id: Option<i64>, service_id: Option<i64>) -> Self {
        Self {
            alert_type: AlertType::HighUsage,
            node_id,
            vm_id,
            service_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub service_id: Option<i64>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            alert_type: self.alert_type,
            node_id: self.node_id,
            vm_id: self.vm_id,
            service_id: self.service_id,
        }
    }
}

/// Display names of whatever an alert is about, for messages and notifications
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectNames {
    pub node: Option<String>,
    pub vm: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub key: AlertKey,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Notification targets
// ============================================================================

fn default_method() -> String {
    "POST".to_string()
}

/// Generic HTTP callback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Webhook {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Empty admits every alert type
    pub alert_types: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewWebhook {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub alert_types: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Slack or Discord incoming webhook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    pub kind: ChannelKind,
    pub webhook_url: String,
    pub alert_types: Vec<String>,
    pub severity_filter: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewNotificationChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub webhook_url: String,
    #[serde(default)]
    pub alert_types: Vec<String>,
    #[serde(default)]
    pub severity_filter: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}
