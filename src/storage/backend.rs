//! Storage trait definitions
//!
//! The monitoring core sees persistence as typed records behind a
//! unit-of-work: [`Store::begin`] opens a [`StoreTx`], every read and write of
//! one node tick or one service tick goes through it, and nothing becomes
//! visible to other units of work until [`StoreTx::commit`]. Dropping a
//! transaction without committing discards its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::models::{
    Alert, AlertKey, AlertRule, HealthCheckResult, MetricSample, MetricType, MonitoredNode,
    MonitoredService, NewAlert, NewAlertRule, NewHealthCheck, NewMetricSample, NewNode,
    NewNotificationChannel, NewService, NewWebhook, NodeStatus, NodeUsage, NotificationChannel,
    VirtualMachine, VmSnapshot, Webhook,
};

/// Poll result written back to a node record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePoll {
    pub status: NodeStatus,
    pub last_check: DateTime<Utc>,

    /// Replaces the stored usage figures when present; kept otherwise
    pub usage: Option<NodeUsage>,
}

/// Filter for metric history queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricQuery {
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub metric_type: MetricType,
    pub since: DateTime<Utc>,
}

/// Entry point of a storage backend
///
/// Implementations must be `Send + Sync`; the scheduler shares one store
/// between all job actors and on-demand callers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> StorageResult<Box<dyn StoreTx>>;

    /// Human-readable backend description for logs
    fn describe(&self) -> String;
}

/// One unit of work over the monitoring records
///
/// List operations return every record of a type; callers filter for
/// `is_active` and friends. Rows that cannot be decoded are skipped with a
/// warning rather than failing the whole list.
#[async_trait]
pub trait StoreTx: Send {
    // ========================================================================
    // Nodes and virtual machines
    // ========================================================================

    async fn nodes(&mut self) -> StorageResult<Vec<MonitoredNode>>;

    async fn node(&mut self, id: i64) -> StorageResult<Option<MonitoredNode>>;

    async fn insert_node(&mut self, node: NewNode) -> StorageResult<MonitoredNode>;

    /// Store the outcome of a node poll
    async fn record_node_poll(&mut self, node_id: i64, poll: NodePoll) -> StorageResult<()>;

    async fn vms(&mut self, node_id: i64) -> StorageResult<Vec<VirtualMachine>>;

    /// First synced VM carrying this Proxmox vmid, on any node
    async fn vm_by_vmid(&mut self, vmid: u32) -> StorageResult<Option<VirtualMachine>>;

    /// Insert or update the VM identified by `(node_id, snapshot.vmid)`
    async fn upsert_vm(
        &mut self,
        node_id: i64,
        snapshot: &VmSnapshot,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<VirtualMachine>;

    // ========================================================================
    // Services and health checks
    // ========================================================================

    async fn services(&mut self) -> StorageResult<Vec<MonitoredService>>;

    async fn service(&mut self, id: i64) -> StorageResult<Option<MonitoredService>>;

    async fn insert_service(&mut self, service: NewService) -> StorageResult<MonitoredService>;

    async fn insert_health_check(
        &mut self,
        check: NewHealthCheck,
    ) -> StorageResult<HealthCheckResult>;

    /// Health checks of a service at or after `since`, oldest first
    async fn health_checks_since(
        &mut self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<HealthCheckResult>>;

    /// Delete health checks older than `before`, returning the count
    async fn prune_health_checks(&mut self, before: DateTime<Utc>) -> StorageResult<u64>;

    // ========================================================================
    // Metrics
    // ========================================================================

    async fn append_metrics(&mut self, samples: &[NewMetricSample]) -> StorageResult<()>;

    /// Samples matching the query exactly (absent ids match absent ids),
    /// oldest first
    async fn metrics(&mut self, query: MetricQuery) -> StorageResult<Vec<MetricSample>>;

    /// Delete samples older than `before`, returning the count
    async fn prune_metrics(&mut self, before: DateTime<Utc>) -> StorageResult<u64>;

    // ========================================================================
    // Rules and alerts
    // ========================================================================

    /// All rules, ordered by id
    async fn alert_rules(&mut self) -> StorageResult<Vec<AlertRule>>;

    async fn insert_alert_rule(&mut self, rule: NewAlertRule) -> StorageResult<AlertRule>;

    async fn mark_rule_triggered(&mut self, rule_id: i64, at: DateTime<Utc>)
    -> StorageResult<()>;

    /// All alerts, newest first
    async fn alerts(&mut self) -> StorageResult<Vec<Alert>>;

    /// The unresolved alert holding `key`, if any
    async fn find_open_alert(&mut self, key: &AlertKey) -> StorageResult<Option<Alert>>;

    /// Unresolved alerts of any type linked to a service
    async fn open_alerts_for_service(&mut self, service_id: i64) -> StorageResult<Vec<Alert>>;

    /// Create an alert unless an unresolved one with the same key exists.
    ///
    /// Returns `None` when the key is taken; this holds even against a
    /// concurrent writer that committed after this transaction last looked.
    async fn insert_alert(&mut self, alert: NewAlert) -> StorageResult<Option<Alert>>;

    /// Flip the given alerts to resolved, returning how many changed
    async fn resolve_alerts(&mut self, ids: &[i64], at: DateTime<Utc>) -> StorageResult<u64>;

    // ========================================================================
    // Notification targets
    // ========================================================================

    async fn webhooks(&mut self) -> StorageResult<Vec<Webhook>>;

    async fn insert_webhook(&mut self, webhook: NewWebhook) -> StorageResult<Webhook>;

    async fn notification_channels(&mut self) -> StorageResult<Vec<NotificationChannel>>;

    async fn insert_notification_channel(
        &mut self,
        channel: NewNotificationChannel,
    ) -> StorageResult<NotificationChannel>;

    /// Make every write of this unit of work visible
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
