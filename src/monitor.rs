//! One unit of work per target
//!
//! [`Monitor`] implements what happens to a single node or service when it
//! is checked, regardless of who asked: a periodic job or an on-demand API
//! call. Every call follows the same order:
//!
//! 1. talk to the target (Proxmox API or health probe), no transaction open
//! 2. reconcile the observation into the store in one transaction
//! 3. commit
//! 4. announce alerts opened by the transaction, then broadcast the update

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, trace, warn};

use crate::alerts::AlertManager;
use crate::config::RetentionConfig;
use crate::live::{LiveEvent, LiveUpdateSink};
use crate::models::{
    AlertKey, CheckStatus, HealthCheckResult, MetricType, MonitoredNode, MonitoredService,
    NewAlert, NewHealthCheck, NewMetricSample, NodeStatus, NodeUsage, Severity, SubjectNames,
};
use crate::monitors::{HealthChecker, NodeTransition};
use crate::notify::{AlertContext, Notifier};
use crate::proxmox::ProxmoxGateway;
use crate::rules::{self, MetricEvaluation};
use crate::storage::{NodePoll, StorageResult, Store, StoreTx};
use crate::uptime::{self, ServiceUptime};

/// What a node check observed
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCheck {
    /// Inactive or in maintenance; nothing was touched
    Skipped,
    Online(NodeUsage),
    /// The connection test failed
    Offline,
    /// Reachable, but the status could not be read
    Error(String),
}

impl NodeCheck {
    fn status(&self) -> NodeStatus {
        match self {
            NodeCheck::Skipped => NodeStatus::Unknown,
            NodeCheck::Online(_) => NodeStatus::Online,
            NodeCheck::Offline => NodeStatus::Offline,
            NodeCheck::Error(_) => NodeStatus::Error,
        }
    }

    fn usage(&self) -> Option<NodeUsage> {
        match self {
            NodeCheck::Online(usage) => Some(*usage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmSync {
    Skipped,
    Synced { vm_count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCheck {
    Skipped,
    Checked(HealthCheckResult),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub metrics_deleted: u64,
    pub health_checks_deleted: u64,
}

pub struct Monitor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ProxmoxGateway>,
    checker: HealthChecker,
    alerts: AlertManager,
    sink: Arc<dyn LiveUpdateSink>,
    retention: RetentionConfig,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ProxmoxGateway>,
        notifier: Arc<Notifier>,
        sink: Arc<dyn LiveUpdateSink>,
        retention: RetentionConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            gateway,
            checker: HealthChecker::new()?,
            alerts: AlertManager::new(notifier, sink.clone()),
            sink,
            retention,
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn nodes(&self) -> StorageResult<Vec<MonitoredNode>> {
        let mut tx = self.store.begin().await?;
        tx.nodes().await
    }

    pub async fn node(&self, id: i64) -> StorageResult<Option<MonitoredNode>> {
        let mut tx = self.store.begin().await?;
        tx.node(id).await
    }

    pub async fn services(&self) -> StorageResult<Vec<MonitoredService>> {
        let mut tx = self.store.begin().await?;
        tx.services().await
    }

    pub async fn service(&self, id: i64) -> StorageResult<Option<MonitoredService>> {
        let mut tx = self.store.begin().await?;
        tx.service(id).await
    }

    pub async fn service_uptime(
        &self,
        service_id: i64,
        period_hours: u32,
    ) -> StorageResult<ServiceUptime> {
        let mut tx = self.store.begin().await?;
        uptime::service_uptime(&mut *tx, service_id, period_hours, Utc::now()).await
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Poll a node's status, record it with its metrics and handle the
    /// `node_down` incident on status edges
    #[instrument(skip(self, node), fields(node = %node.name))]
    pub async fn check_node(&self, node: &MonitoredNode) -> anyhow::Result<NodeCheck> {
        if !node.is_pollable() {
            debug!("node is inactive or in maintenance, skipping");
            return Ok(NodeCheck::Skipped);
        }

        let observed = match self.gateway.test_connection(node).await {
            Err(e) => {
                warn!("connection test failed: {e:#}");
                NodeCheck::Offline
            }
            Ok(()) => match self.gateway.node_status(node).await {
                Ok(usage) => NodeCheck::Online(usage),
                Err(e) => {
                    warn!("failed to read node status: {e:#}");
                    NodeCheck::Error(format!("{e:#}"))
                }
            },
        };

        let now = Utc::now();
        let status = observed.status();
        let mut announcements = Vec::new();

        let mut tx = self.store.begin().await?;
        let Some(current) = tx.node(node.id).await?.filter(MonitoredNode::is_pollable) else {
            debug!("node was removed or paused during the check, discarding result");
            return Ok(NodeCheck::Skipped);
        };

        tx.record_node_poll(
            node.id,
            NodePoll {
                status,
                last_check: now,
                usage: observed.usage(),
            },
        )
        .await?;

        let subject = SubjectNames {
            node: Some(current.name.clone()),
            ..Default::default()
        };

        match NodeTransition::between(current.status, status) {
            NodeTransition::WentOffline => {
                let opened = tx
                    .insert_alert(NewAlert {
                        key: AlertKey::node_down(node.id),
                        severity: Severity::Critical,
                        title: format!("Node {} is offline", current.name),
                        message: format!("Node {} is no longer responding", current.name),
                        created_at: now,
                    })
                    .await?;
                if let Some(alert) = opened {
                    announcements.push(AlertContext {
                        alert,
                        subject: subject.clone(),
                    });
                }
            }
            NodeTransition::CameOnline => {
                if let Some(open) = tx.find_open_alert(&AlertKey::node_down(node.id)).await? {
                    tx.resolve_alerts(&[open.id], now).await?;
                    info!("node is back online, resolved alert {}", open.id);
                }
            }
            NodeTransition::NoEdge => {}
        }

        if let Some(usage) = observed.usage() {
            let readings = [
                (MetricType::Cpu, usage.cpu_usage),
                (MetricType::Memory, usage.memory_percent()),
                (MetricType::Disk, usage.disk_percent()),
            ];
            let samples = readings.map(|(metric_type, value)| {
                NewMetricSample::percent(metric_type, value, Some(node.id), None, now)
            });
            tx.append_metrics(&samples).await?;

            for (metric_type, value) in readings {
                let evaluation = MetricEvaluation {
                    metric_type,
                    value,
                    node_id: Some(node.id),
                    vm_id: None,
                    service_id: None,
                    at: now,
                };
                if let Some(alert) = rules::evaluate(&mut *tx, &evaluation, &subject).await? {
                    announcements.push(AlertContext {
                        alert,
                        subject: subject.clone(),
                    });
                }
            }
        }

        tx.commit().await?;
        trace!("node status {status} recorded");

        self.alerts.announce_all(announcements).await;
        self.sink
            .broadcast(LiveEvent::NodeUpdate {
                node_id: node.id,
                status,
                last_check: now,
            })
            .await;

        Ok(observed)
    }

    /// Upsert every guest the node reports and record their metrics; guests
    /// that are no longer reported are left untouched
    #[instrument(skip(self, node), fields(node = %node.name))]
    pub async fn sync_vms(&self, node: &MonitoredNode) -> anyhow::Result<VmSync> {
        if !node.is_pollable() {
            debug!("node is inactive or in maintenance, skipping");
            return Ok(VmSync::Skipped);
        }

        let snapshots = self
            .gateway
            .list_vms(node)
            .await
            .with_context(|| format!("failed to list guests of node {}", node.name))?;

        let now = Utc::now();
        let mut announcements = Vec::new();

        let mut tx = self.store.begin().await?;
        let Some(current) = tx.node(node.id).await?.filter(MonitoredNode::is_pollable) else {
            debug!("node was removed or paused during the sync, discarding result");
            return Ok(VmSync::Skipped);
        };

        for snapshot in &snapshots {
            let vm = tx.upsert_vm(node.id, snapshot, now).await?;

            let readings = [
                (MetricType::Cpu, snapshot.cpu_usage),
                (MetricType::Memory, snapshot.memory_percent()),
            ];
            let samples = readings.map(|(metric_type, value)| {
                NewMetricSample::percent(metric_type, value, Some(node.id), Some(vm.id), now)
            });
            tx.append_metrics(&samples).await?;

            let subject = SubjectNames {
                node: Some(current.name.clone()),
                vm: Some(vm.name.clone()),
                service: None,
            };
            for (metric_type, value) in readings {
                let evaluation = MetricEvaluation {
                    metric_type,
                    value,
                    node_id: Some(node.id),
                    vm_id: Some(vm.id),
                    service_id: None,
                    at: now,
                };
                if let Some(alert) = rules::evaluate(&mut *tx, &evaluation, &subject).await? {
                    announcements.push(AlertContext {
                        alert,
                        subject: subject.clone(),
                    });
                }
            }
        }

        tx.commit().await?;
        debug!("synced {} guests", snapshots.len());

        self.alerts.announce_all(announcements).await;
        self.sink
            .broadcast(LiveEvent::VmsUpdate {
                node_id: node.id,
                vm_count: snapshots.len(),
            })
            .await;

        Ok(VmSync::Synced {
            vm_count: snapshots.len(),
        })
    }

    // ========================================================================
    // Services
    // ========================================================================

    /// Probe a service, record the result and open or resolve its
    /// `service_down` incident
    #[instrument(skip(self, service), fields(service = %service.name))]
    pub async fn check_service(&self, service: &MonitoredService) -> anyhow::Result<ServiceCheck> {
        if !service.is_pollable() {
            debug!("service is inactive or in maintenance, skipping");
            return Ok(ServiceCheck::Skipped);
        }

        let outcome = self.checker.check_service(service).await;
        let now = Utc::now();
        let mut announcements = Vec::new();

        let mut tx = self.store.begin().await?;
        let Some(current) = tx
            .service(service.id)
            .await?
            .filter(MonitoredService::is_pollable)
        else {
            debug!("service was removed or paused during the check, discarding result");
            return Ok(ServiceCheck::Skipped);
        };

        let result = tx
            .insert_health_check(NewHealthCheck {
                service_id: service.id,
                outcome: outcome.clone(),
                checked_at: now,
            })
            .await?;

        let open = tx.open_alerts_for_service(service.id).await?;
        match outcome.status {
            CheckStatus::Down if open.is_empty() => {
                let subject = service_subject(&mut *tx, &current).await?;
                let opened = tx
                    .insert_alert(NewAlert {
                        key: AlertKey::service_down(service.id),
                        severity: Severity::Critical,
                        title: format!("Service {} is down", current.name),
                        message: outcome
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "Service check failed".to_string()),
                        created_at: now,
                    })
                    .await?;
                if let Some(alert) = opened {
                    announcements.push(AlertContext { alert, subject });
                }
            }
            CheckStatus::Down => trace!("service is still down, incident already open"),
            CheckStatus::Up | CheckStatus::Warning if !open.is_empty() => {
                let ids: Vec<i64> = open.iter().map(|alert| alert.id).collect();
                let resolved = tx.resolve_alerts(&ids, now).await?;
                info!("service recovered, resolved {resolved} alerts");
            }
            CheckStatus::Up | CheckStatus::Warning => {}
        }

        tx.commit().await?;

        self.alerts.announce_all(announcements).await;
        self.sink
            .broadcast(LiveEvent::ServiceUpdate {
                service_id: service.id,
                status: result.status,
                response_time: result.response_time_ms,
            })
            .await;

        Ok(ServiceCheck::Checked(result))
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete old samples (and, when configured, old health checks) in one
    /// transaction; `None` when retention is disabled
    #[instrument(skip(self))]
    pub async fn run_retention(&self) -> anyhow::Result<Option<RetentionReport>> {
        if !self.retention.enabled {
            debug!("retention is disabled");
            return Ok(None);
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let metrics_before = now - Duration::days(self.retention.metrics_retention_days.into());
        let metrics_deleted = tx.prune_metrics(metrics_before).await?;

        let health_checks_deleted = match self.retention.health_check_retention_days {
            Some(days) => tx.prune_health_checks(now - Duration::days(days.into())).await?,
            None => 0,
        };

        tx.commit().await?;

        if metrics_deleted > 0 || health_checks_deleted > 0 {
            info!(
                "cleaned up {metrics_deleted} metric samples older than {} days and {health_checks_deleted} health checks",
                self.retention.metrics_retention_days
            );
        }

        Ok(Some(RetentionReport {
            metrics_deleted,
            health_checks_deleted,
        }))
    }
}

/// Names of a service, its VM and that VM's node
async fn service_subject(
    tx: &mut dyn StoreTx,
    service: &MonitoredService,
) -> StorageResult<SubjectNames> {
    let mut subject = SubjectNames {
        service: Some(service.name.clone()),
        ..Default::default()
    };

    if let Some(vm) = match service.vmid {
        Some(vmid) => tx.vm_by_vmid(vmid).await?,
        None => None,
    } {
        subject.node = tx.node(vm.node_id).await?.map(|node| node.name);
        subject.vm = Some(vm.name);
    }

    Ok(subject)
}
