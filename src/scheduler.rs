//! Periodic monitoring jobs and the on-demand entry points
//!
//! [`Scheduler::start`] spawns three job actors (nodes, services, retention).
//! Each job fans its targets out onto a [`JoinSet`]; a target's failure is
//! logged and counted, never propagated, so every target is attempted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actors::job::{JobHandle, PeriodicJob};
use crate::actors::messages::JobReport;
use crate::config::SchedulerConfig;
use crate::models::MonitoredService;
use crate::monitor::{Monitor, NodeCheck, ServiceCheck, VmSync};
use crate::storage::StorageError;

/// Slack allowed when deciding whether a service is due, so a service whose
/// interval equals the job interval is not pushed back by timer jitter
const DUE_SLACK: Duration = Duration::from_secs(1);

// ============================================================================
// Jobs
// ============================================================================

pub struct NodePollJob {
    monitor: Arc<Monitor>,
}

impl NodePollJob {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl PeriodicJob for NodePollJob {
    fn name(&self) -> &'static str {
        "node-poll"
    }

    async fn run_once(&mut self, report: &mut JobReport) {
        let nodes = match self.monitor.nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("failed to load nodes: {e}");
                report.record::<(), _>(&Err(e));
                return;
            }
        };

        let mut tasks = JoinSet::new();
        for node in nodes.into_iter().filter(|node| node.is_pollable()) {
            let monitor = self.monitor.clone();
            tasks.spawn(async move {
                if let NodeCheck::Online(_) = monitor.check_node(&node).await? {
                    monitor.sync_vms(&node).await?;
                }
                anyhow::Ok(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("node task panicked: {e}")),
            };
            if let Err(e) = &result {
                error!("node poll failed: {e:#}");
            }
            report.record(&result);
        }
    }
}

/// When the service job last probed each service
#[derive(Debug, Default)]
struct DueTracker {
    last_run: HashMap<i64, Instant>,
}

impl DueTracker {
    fn is_due(&self, service: &MonitoredService, now: Instant) -> bool {
        is_due(self.last_run.get(&service.id).copied(), service.check_interval, now)
    }

    fn mark(&mut self, service_id: i64, now: Instant) {
        self.last_run.insert(service_id, now);
    }

    /// Drop entries of services that are no longer stored
    fn retain_known(&mut self, services: &[MonitoredService]) {
        self.last_run
            .retain(|id, _| services.iter().any(|service| service.id == *id));
    }
}

pub struct ServicePollJob {
    monitor: Arc<Monitor>,
    due: DueTracker,
}

impl ServicePollJob {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self {
            monitor,
            due: DueTracker::default(),
        }
    }
}

/// A service never probed by this job is always due
fn is_due(last_run: Option<Instant>, check_interval_secs: u64, now: Instant) -> bool {
    last_run.is_none_or(|last| {
        now.duration_since(last) + DUE_SLACK >= Duration::from_secs(check_interval_secs)
    })
}

#[async_trait]
impl PeriodicJob for ServicePollJob {
    fn name(&self) -> &'static str {
        "service-poll"
    }

    async fn run_once(&mut self, report: &mut JobReport) {
        let services = match self.monitor.services().await {
            Ok(services) => services,
            Err(e) => {
                error!("failed to load services: {e}");
                report.record::<(), _>(&Err(e));
                return;
            }
        };

        self.due.retain_known(&services);

        let now = Instant::now();
        let mut tasks = JoinSet::new();
        for service in services.into_iter().filter(MonitoredService::is_pollable) {
            if !self.due.is_due(&service, now) {
                debug!("service {} is not due yet", service.name);
                continue;
            }
            self.due.mark(service.id, now);

            let monitor = self.monitor.clone();
            tasks.spawn(async move { monitor.check_service(&service).await.map(|_| ()) });
        }

        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("service task panicked: {e}")),
            };
            if let Err(e) = &result {
                error!("service check failed: {e:#}");
            }
            report.record(&result);
        }
    }
}

pub struct RetentionJob {
    monitor: Arc<Monitor>,
}

impl RetentionJob {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl PeriodicJob for RetentionJob {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn run_once(&mut self, report: &mut JobReport) {
        match self.monitor.run_retention().await {
            Ok(None) => {}
            Ok(Some(_)) => report.record::<(), ()>(&Ok(())),
            Err(e) => {
                // nothing was deleted; the next run retries
                error!("metrics cleanup failed: {e:#}");
                report.record::<(), _>(&Err(e));
            }
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// The running job actors plus on-demand access to the same units of work
pub struct Scheduler {
    monitor: Arc<Monitor>,
    nodes: JobHandle,
    services: JobHandle,
    retention: JobHandle,
}

impl Scheduler {
    /// Spawn the periodic jobs; the first run of each happens one interval
    /// after start
    pub fn start(monitor: Arc<Monitor>, config: &SchedulerConfig) -> Self {
        info!(
            "starting scheduler (nodes every {:?}, services every {:?}, retention every {:?})",
            config.node_interval(),
            config.service_interval(),
            config.retention_interval()
        );

        Self {
            nodes: JobHandle::spawn(NodePollJob::new(monitor.clone()), config.node_interval()),
            services: JobHandle::spawn(
                ServicePollJob::new(monitor.clone()),
                config.service_interval(),
            ),
            retention: JobHandle::spawn(
                RetentionJob::new(monitor.clone()),
                config.retention_interval(),
            ),
            monitor,
        }
    }

    /// Stop every job, letting in-flight runs finish
    pub async fn stop(&self) {
        info!("stopping scheduler");
        tokio::join!(
            self.nodes.shutdown(),
            self.services.shutdown(),
            self.retention.shutdown()
        );
        info!("scheduler stopped");
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    // ========================================================================
    // Whole-job runs
    // ========================================================================

    pub async fn run_node_job(&self) -> anyhow::Result<JobReport> {
        self.nodes.run_now().await
    }

    pub async fn run_service_job(&self) -> anyhow::Result<JobReport> {
        self.services.run_now().await
    }

    pub async fn run_retention_job(&self) -> anyhow::Result<JobReport> {
        self.retention.run_now().await
    }

    // ========================================================================
    // Single targets
    // ========================================================================

    pub async fn check_node(&self, node_id: i64) -> anyhow::Result<NodeCheck> {
        let node = self
            .monitor
            .node(node_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("node {node_id}")))?;
        self.monitor.check_node(&node).await
    }

    pub async fn sync_vms(&self, node_id: i64) -> anyhow::Result<VmSync> {
        let node = self
            .monitor
            .node(node_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("node {node_id}")))?;
        self.monitor.sync_vms(&node).await
    }

    pub async fn check_service(&self, service_id: i64) -> anyhow::Result<ServiceCheck> {
        let service = self
            .monitor
            .service(service_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("service {service_id}")))?;

        let check = self.monitor.check_service(&service).await?;
        if let ServiceCheck::Skipped = check {
            warn!("service {} is inactive or in maintenance", service.name);
        }
        Ok(check)
    }
}
