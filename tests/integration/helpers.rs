//! Shared fixtures: a scripted Proxmox gateway, a recording live sink and
//! record builders

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use monitorix::config::RetentionConfig;
use monitorix::live::{LiveEvent, LiveUpdateSink};
use monitorix::models::{
    Alert, AlertType, CheckKind, Comparator, CustomCheck, MetricType, MonitoredNode,
    MonitoredService, NewAlertRule, NewNode, NewService, NodeUsage, Severity, VmKind, VmSnapshot,
};
use monitorix::monitor::Monitor;
use monitorix::notify::Notifier;
use monitorix::proxmox::ProxmoxGateway;
use monitorix::storage::{MemoryStore, Store};

// ============================================================================
// Fake gateway
// ============================================================================

/// What the fake Proxmox API answers for one node
#[derive(Debug, Clone)]
pub enum NodeScript {
    Online {
        usage: NodeUsage,
        vms: Vec<VmSnapshot>,
    },
    Offline,
    /// Connection test passes, status read fails
    BrokenStatus,
    /// Online, but listing guests fails
    BrokenGuests { usage: NodeUsage },
}

/// Answers by node name; unknown nodes are offline
#[derive(Debug, Default)]
pub struct FakeGateway {
    scripts: Mutex<HashMap<String, NodeScript>>,
}

impl FakeGateway {
    pub fn script(&self, node: &str, script: NodeScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(node.to_string(), script);
    }

    fn lookup(&self, node: &MonitoredNode) -> NodeScript {
        self.scripts
            .lock()
            .unwrap()
            .get(&node.name)
            .cloned()
            .unwrap_or(NodeScript::Offline)
    }
}

#[async_trait]
impl ProxmoxGateway for FakeGateway {
    async fn test_connection(&self, node: &MonitoredNode) -> anyhow::Result<()> {
        match self.lookup(node) {
            NodeScript::Offline => bail!("connection refused"),
            _ => Ok(()),
        }
    }

    async fn node_status(&self, node: &MonitoredNode) -> anyhow::Result<NodeUsage> {
        match self.lookup(node) {
            NodeScript::Online { usage, .. } | NodeScript::BrokenGuests { usage } => Ok(usage),
            NodeScript::BrokenStatus => bail!("500 Internal Server Error"),
            NodeScript::Offline => bail!("connection refused"),
        }
    }

    async fn list_vms(&self, node: &MonitoredNode) -> anyhow::Result<Vec<VmSnapshot>> {
        match self.lookup(node) {
            NodeScript::Online { vms, .. } => Ok(vms),
            _ => bail!("guest listing failed"),
        }
    }
}

// ============================================================================
// Recording sink
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LiveEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LiveEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(LiveEvent::event_type).collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LiveEvent::Alert(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl LiveUpdateSink for RecordingSink {
    async fn broadcast(&self, event: LiveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<RecordingSink>,
    pub monitor: Arc<Monitor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self::with_retention(store, RetentionConfig::default())
    }

    pub fn with_retention(store: Arc<dyn Store>, retention: RetentionConfig) -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(Notifier::new(store.clone(), None).unwrap());
        let monitor = Arc::new(
            Monitor::new(
                store.clone(),
                gateway.clone(),
                notifier,
                sink.clone(),
                retention,
            )
            .unwrap(),
        );

        Self {
            store,
            gateway,
            sink,
            monitor,
        }
    }

    pub async fn add_node(&self, name: &str) -> MonitoredNode {
        let mut tx = self.store.begin().await.unwrap();
        let node = tx.insert_node(new_node(name)).await.unwrap();
        tx.commit().await.unwrap();
        node
    }

    pub async fn add_service(&self, service: NewService) -> MonitoredService {
        let mut tx = self.store.begin().await.unwrap();
        let service = tx.insert_service(service).await.unwrap();
        tx.commit().await.unwrap();
        service
    }

    pub async fn add_rule(&self, rule: NewAlertRule) {
        let mut tx = self.store.begin().await.unwrap();
        tx.insert_alert_rule(rule).await.unwrap();
        tx.commit().await.unwrap();
    }

    /// Current record, as the scheduler would load it
    pub async fn node(&self, id: i64) -> MonitoredNode {
        self.monitor.node(id).await.unwrap().unwrap()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        let mut tx = self.store.begin().await.unwrap();
        tx.alerts().await.unwrap()
    }

    pub async fn open_alerts(&self, alert_type: AlertType) -> Vec<Alert> {
        self.alerts()
            .await
            .into_iter()
            .filter(|alert| alert.alert_type == alert_type && !alert.is_resolved)
            .collect()
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn new_node(name: &str) -> NewNode {
    NewNode {
        name: name.to_string(),
        url: format!("https://{name}.local:8006"),
        username: "monitor@pve".to_string(),
        token: "monitorix=secret".to_string(),
        verify_ssl: true,
        is_active: true,
        maintenance_mode: false,
    }
}

/// A service probed by running `command` through the shell
pub fn command_service(name: &str, command: &str) -> NewService {
    NewService {
        name: name.to_string(),
        vmid: None,
        check: CheckKind::Custom {
            run: CustomCheck::Command(command.to_string()),
        },
        timeout: 5,
        check_interval: 60,
        is_active: true,
        maintenance_mode: false,
    }
}

pub fn usage(cpu_usage: f64) -> NodeUsage {
    NodeUsage {
        cpu_usage,
        memory_used: 4 * 1024,
        memory_total: 16 * 1024,
        disk_used: 10,
        disk_total: 100,
        uptime: 3600,
    }
}

pub fn vm(vmid: u32, name: &str, cpu_usage: f64) -> VmSnapshot {
    VmSnapshot {
        vmid,
        name: Some(name.to_string()),
        kind: VmKind::Qemu,
        status: "running".to_string(),
        cpu_usage,
        memory_used: 512,
        memory_total: 1024,
        disk_used: 0,
        disk_total: 0,
        uptime: 60,
    }
}

pub fn cpu_rule(name: &str, threshold: f64, severity: Severity) -> NewAlertRule {
    NewAlertRule {
        name: name.to_string(),
        metric_type: MetricType::Cpu,
        comparator: Comparator::Gt,
        threshold,
        severity,
        node_id: None,
        vm_id: None,
        service_id: None,
        cooldown_minutes: 5,
        is_active: true,
        last_triggered: None,
    }
}

pub fn online(cpu_usage: f64) -> NodeScript {
    NodeScript::Online {
        usage: usage(cpu_usage),
        vms: Vec::new(),
    }
}
