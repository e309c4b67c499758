//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Short-lived deployments configured with `{"backend": "none"}`
//!
//! ## Transactions
//!
//! A unit of work holds the store's lock for its whole lifetime and writes
//! to the state in place, journaling the prior value of every row it touches.
//! Dropping it without `commit` replays the journal backwards. Units of work
//! are therefore serialised, which is what makes check-then-insert sequences
//! (alert dedup) race free here. Callers keep units of work short and never
//! perform network I/O while one is open.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use super::backend::{MetricQuery, NodePoll, Store, StoreTx};
use super::error::{StorageError, StorageResult};
use crate::models::{
    Alert, AlertKey, AlertRule, HealthCheckResult, MetricSample, MonitoredNode, MonitoredService,
    NewAlert, NewAlertRule, NewHealthCheck, NewMetricSample, NewNode, NewNotificationChannel,
    NewService, NewWebhook, NodeStatus, NotificationChannel, VirtualMachine, VmSnapshot, Webhook,
};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    nodes: BTreeMap<i64, MonitoredNode>,
    vms: BTreeMap<i64, VirtualMachine>,
    services: BTreeMap<i64, MonitoredService>,
    health_checks: Vec<HealthCheckResult>,
    metrics: Vec<MetricSample>,
    rules: BTreeMap<i64, AlertRule>,
    alerts: BTreeMap<i64, Alert>,
    webhooks: BTreeMap<i64, Webhook>,
    channels: BTreeMap<i64, NotificationChannel>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

/// How to take back one write of an uncommitted unit of work
#[derive(Debug)]
enum Undo {
    Node(i64, Option<MonitoredNode>),
    Vm(i64, Option<VirtualMachine>),
    Service(i64, Option<MonitoredService>),
    Rule(i64, Option<AlertRule>),
    Alert(i64, Option<Alert>),
    Webhook(i64, Option<Webhook>),
    Channel(i64, Option<NotificationChannel>),
    TruncateHealthChecks(usize),
    RestoreHealthChecks(Vec<HealthCheckResult>),
    TruncateMetrics(usize),
    RestoreMetrics(Vec<MetricSample>),
}

fn put_back<T>(rows: &mut BTreeMap<i64, T>, id: i64, prior: Option<T>) {
    match prior {
        Some(row) => rows.insert(id, row),
        None => rows.remove(&id),
    };
}

impl Undo {
    fn apply(self, state: &mut MemoryState) {
        match self {
            Undo::Node(id, prior) => put_back(&mut state.nodes, id, prior),
            Undo::Vm(id, prior) => put_back(&mut state.vms, id, prior),
            Undo::Service(id, prior) => put_back(&mut state.services, id, prior),
            Undo::Rule(id, prior) => put_back(&mut state.rules, id, prior),
            Undo::Alert(id, prior) => put_back(&mut state.alerts, id, prior),
            Undo::Webhook(id, prior) => put_back(&mut state.webhooks, id, prior),
            Undo::Channel(id, prior) => put_back(&mut state.channels, id, prior),
            Undo::TruncateHealthChecks(len) => state.health_checks.truncate(len),
            Undo::RestoreHealthChecks(removed) => {
                // rows are appended in id order
                state.health_checks.extend(removed);
                state.health_checks.sort_by_key(|check| check.id);
            }
            Undo::TruncateMetrics(len) => state.metrics.truncate(len),
            Undo::RestoreMetrics(removed) => {
                state.metrics.extend(removed);
                state.metrics.sort_by_key(|sample| sample.id);
            }
        }
    }
}

/// In-memory storage backend
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTx>> {
        let state = self.state.clone().lock_owned().await;
        let last_id = state.last_id;
        trace!("opened in-memory unit of work");
        Ok(Box::new(MemoryTx {
            state,
            last_id,
            undo: Vec::new(),
        }))
    }

    fn describe(&self) -> String {
        "in-memory (no persistence)".to_string()
    }
}

/// Unit of work over a [`MemoryStore`]
pub struct MemoryTx {
    state: OwnedMutexGuard<MemoryState>,
    /// Id counter when the unit of work began
    last_id: i64,
    undo: Vec<Undo>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.undo.is_empty() && self.state.last_id == self.last_id {
            return;
        }
        trace!("rolling back {} in-memory writes", self.undo.len());
        while let Some(undo) = self.undo.pop() {
            undo.apply(&mut self.state);
        }
        self.state.last_id = self.last_id;
    }
}

fn missing(kind: &str, id: i64) -> StorageError {
    StorageError::NotFound(format!("{kind} {id}"))
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn nodes(&mut self) -> StorageResult<Vec<MonitoredNode>> {
        Ok(self.state.nodes.values().cloned().collect())
    }

    async fn node(&mut self, id: i64) -> StorageResult<Option<MonitoredNode>> {
        Ok(self.state.nodes.get(&id).cloned())
    }

    async fn insert_node(&mut self, node: NewNode) -> StorageResult<MonitoredNode> {
        let id = self.state.next_id();
        let record = MonitoredNode {
            id,
            name: node.name,
            url: node.url,
            username: node.username,
            token: node.token,
            verify_ssl: node.verify_ssl,
            is_active: node.is_active,
            maintenance_mode: node.maintenance_mode,
            status: NodeStatus::Unknown,
            last_check: None,
            usage: None,
            created_at: Utc::now(),
        };
        self.undo.push(Undo::Node(id, None));
        self.state.nodes.insert(id, record.clone());
        Ok(record)
    }

    async fn record_node_poll(&mut self, node_id: i64, poll: NodePoll) -> StorageResult<()> {
        let prior = self.state.nodes.get(&node_id).cloned();
        let node = self
            .state
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| missing("node", node_id))?;
        self.undo.push(Undo::Node(node_id, prior));
        node.status = poll.status;
        node.last_check = Some(poll.last_check);
        if poll.usage.is_some() {
            node.usage = poll.usage;
        }
        Ok(())
    }

    async fn vms(&mut self, node_id: i64) -> StorageResult<Vec<VirtualMachine>> {
        Ok(self
            .state
            .vms
            .values()
            .filter(|vm| vm.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn vm_by_vmid(&mut self, vmid: u32) -> StorageResult<Option<VirtualMachine>> {
        Ok(self
            .state
            .vms
            .values()
            .filter(|vm| vm.vmid == vmid)
            .min_by_key(|vm| vm.id)
            .cloned())
    }

    async fn upsert_vm(
        &mut self,
        node_id: i64,
        snapshot: &VmSnapshot,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<VirtualMachine> {
        let existing = self
            .state
            .vms
            .values()
            .find(|vm| vm.node_id == node_id && vm.vmid == snapshot.vmid)
            .map(|vm| (vm.id, vm.created_at));

        let (id, created_at) = match existing {
            Some(found) => found,
            None => (self.state.next_id(), seen_at),
        };

        let record = VirtualMachine {
            id,
            node_id,
            vmid: snapshot.vmid,
            name: snapshot.display_name(),
            kind: snapshot.kind,
            status: snapshot.status.clone(),
            cpu_usage: snapshot.cpu_usage,
            memory_used: snapshot.memory_used,
            memory_total: snapshot.memory_total,
            disk_used: snapshot.disk_used,
            disk_total: snapshot.disk_total,
            uptime: snapshot.uptime,
            last_check: seen_at,
            created_at,
        };
        let prior = self.state.vms.insert(id, record.clone());
        self.undo.push(Undo::Vm(id, prior));
        Ok(record)
    }

    async fn services(&mut self) -> StorageResult<Vec<MonitoredService>> {
        Ok(self.state.services.values().cloned().collect())
    }

    async fn service(&mut self, id: i64) -> StorageResult<Option<MonitoredService>> {
        Ok(self.state.services.get(&id).cloned())
    }

    async fn insert_service(&mut self, service: NewService) -> StorageResult<MonitoredService> {
        let id = self.state.next_id();
        let record = MonitoredService {
            id,
            name: service.name,
            vmid: service.vmid,
            check: service.check,
            timeout: service.timeout,
            check_interval: service.check_interval,
            is_active: service.is_active,
            maintenance_mode: service.maintenance_mode,
            created_at: Utc::now(),
        };
        self.undo.push(Undo::Service(id, None));
        self.state.services.insert(id, record.clone());
        Ok(record)
    }

    async fn insert_health_check(
        &mut self,
        check: NewHealthCheck,
    ) -> StorageResult<HealthCheckResult> {
        let record = HealthCheckResult {
            id: self.state.next_id(),
            service_id: check.service_id,
            status: check.outcome.status,
            response_time_ms: check.outcome.response_time_ms,
            status_code: check.outcome.status_code,
            error_message: check.outcome.error_message,
            checked_at: check.checked_at,
        };
        self.undo
            .push(Undo::TruncateHealthChecks(self.state.health_checks.len()));
        self.state.health_checks.push(record.clone());
        Ok(record)
    }

    async fn health_checks_since(
        &mut self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<HealthCheckResult>> {
        let mut checks: Vec<_> = self
            .state
            .health_checks
            .iter()
            .filter(|check| check.service_id == service_id && check.checked_at >= since)
            .cloned()
            .collect();
        checks.sort_by_key(|check| check.checked_at);
        Ok(checks)
    }

    async fn prune_health_checks(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.health_checks)
            .into_iter()
            .partition(|check| check.checked_at >= before);
        self.state.health_checks = kept;
        let count = removed.len() as u64;
        self.undo.push(Undo::RestoreHealthChecks(removed));
        Ok(count)
    }

    async fn append_metrics(&mut self, samples: &[NewMetricSample]) -> StorageResult<()> {
        self.undo
            .push(Undo::TruncateMetrics(self.state.metrics.len()));
        for sample in samples {
            let id = self.state.next_id();
            self.state.metrics.push(MetricSample {
                id,
                node_id: sample.node_id,
                vm_id: sample.vm_id,
                metric_type: sample.metric_type,
                value: sample.value,
                unit: sample.unit.clone(),
                recorded_at: sample.recorded_at,
            });
        }
        Ok(())
    }

    async fn metrics(&mut self, query: MetricQuery) -> StorageResult<Vec<MetricSample>> {
        let mut samples: Vec<_> = self
            .state
            .metrics
            .iter()
            .filter(|sample| {
                sample.node_id == query.node_id
                    && sample.vm_id == query.vm_id
                    && sample.metric_type == query.metric_type
                    && sample.recorded_at >= query.since
            })
            .cloned()
            .collect();
        samples.sort_by_key(|sample| sample.recorded_at);
        Ok(samples)
    }

    async fn prune_metrics(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.state.metrics)
            .into_iter()
            .partition(|sample| sample.recorded_at >= before);
        self.state.metrics = kept;
        let count = removed.len() as u64;
        self.undo.push(Undo::RestoreMetrics(removed));
        Ok(count)
    }

    async fn alert_rules(&mut self) -> StorageResult<Vec<AlertRule>> {
        Ok(self.state.rules.values().cloned().collect())
    }

    async fn insert_alert_rule(&mut self, rule: NewAlertRule) -> StorageResult<AlertRule> {
        let id = self.state.next_id();
        let record = AlertRule {
            id,
            name: rule.name,
            metric_type: rule.metric_type,
            comparator: rule.comparator,
            threshold: rule.threshold,
            severity: rule.severity,
            node_id: rule.node_id,
            vm_id: rule.vm_id,
            service_id: rule.service_id,
            cooldown_minutes: rule.cooldown_minutes,
            is_active: rule.is_active,
            last_triggered: rule.last_triggered,
        };
        self.undo.push(Undo::Rule(id, None));
        self.state.rules.insert(id, record.clone());
        Ok(record)
    }

    async fn mark_rule_triggered(
        &mut self,
        rule_id: i64,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let prior = self.state.rules.get(&rule_id).cloned();
        let rule = self
            .state
            .rules
            .get_mut(&rule_id)
            .ok_or_else(|| missing("alert rule", rule_id))?;
        rule.last_triggered = Some(at);
        self.undo.push(Undo::Rule(rule_id, prior));
        Ok(())
    }

    async fn alerts(&mut self) -> StorageResult<Vec<Alert>> {
        Ok(self.state.alerts.values().rev().cloned().collect())
    }

    async fn find_open_alert(&mut self, key: &AlertKey) -> StorageResult<Option<Alert>> {
        Ok(self
            .state
            .alerts
            .values()
            .find(|alert| !alert.is_resolved && alert.key() == *key)
            .cloned())
    }

    async fn open_alerts_for_service(&mut self, service_id: i64) -> StorageResult<Vec<Alert>> {
        Ok(self
            .state
            .alerts
            .values()
            .filter(|alert| !alert.is_resolved && alert.service_id == Some(service_id))
            .cloned()
            .collect())
    }

    async fn insert_alert(&mut self, alert: NewAlert) -> StorageResult<Option<Alert>> {
        if self.find_open_alert(&alert.key).await?.is_some() {
            return Ok(None);
        }

        let record = Alert {
            id: self.state.next_id(),
            alert_type: alert.key.alert_type,
            severity: alert.severity,
            title: alert.title,
            message: alert.message,
            node_id: alert.key.node_id,
            vm_id: alert.key.vm_id,
            service_id: alert.key.service_id,
            is_resolved: false,
            resolved_at: None,
            created_at: alert.created_at,
        };
        self.undo.push(Undo::Alert(record.id, None));
        self.state.alerts.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn resolve_alerts(&mut self, ids: &[i64], at: DateTime<Utc>) -> StorageResult<u64> {
        let mut resolved = 0;
        for id in ids {
            if let Some(alert) = self.state.alerts.get_mut(id)
                && !alert.is_resolved
            {
                self.undo.push(Undo::Alert(*id, Some(alert.clone())));
                alert.is_resolved = true;
                alert.resolved_at = Some(at);
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn webhooks(&mut self) -> StorageResult<Vec<Webhook>> {
        Ok(self.state.webhooks.values().cloned().collect())
    }

    async fn insert_webhook(&mut self, webhook: NewWebhook) -> StorageResult<Webhook> {
        let id = self.state.next_id();
        let record = Webhook {
            id,
            name: webhook.name,
            url: webhook.url,
            method: webhook.method,
            headers: webhook.headers,
            alert_types: webhook.alert_types,
            is_active: webhook.is_active,
        };
        self.undo.push(Undo::Webhook(id, None));
        self.state.webhooks.insert(id, record.clone());
        Ok(record)
    }

    async fn notification_channels(&mut self) -> StorageResult<Vec<NotificationChannel>> {
        Ok(self.state.channels.values().cloned().collect())
    }

    async fn insert_notification_channel(
        &mut self,
        channel: NewNotificationChannel,
    ) -> StorageResult<NotificationChannel> {
        let id = self.state.next_id();
        let record = NotificationChannel {
            id,
            name: channel.name,
            kind: channel.kind,
            webhook_url: channel.webhook_url,
            alert_types: channel.alert_types,
            severity_filter: channel.severity_filter,
            is_active: channel.is_active,
        };
        self.undo.push(Undo::Channel(id, None));
        self.state.channels.insert(id, record.clone());
        Ok(record)
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.undo.clear();
        self.last_id = self.state.last_id;
        trace!("committed in-memory unit of work");
        Ok(())
    }
}
