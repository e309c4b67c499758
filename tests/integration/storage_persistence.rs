//! The pipeline against the SQLite backend

use std::sync::Arc;

use futures::future::join_all;
use monitorix::config::parse_config;
use monitorix::models::{AlertType, NodeStatus, Severity};
use monitorix::seed::seed;
use monitorix::storage::Store;
use monitorix::storage::sqlite::SqliteStore;
use tempfile::tempdir;

use crate::helpers::*;

async fn sqlite_harness(path: &std::path::Path) -> Harness {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(path).await.unwrap());
    Harness::with_store(store)
}

#[tokio::test]
async fn test_state_survives_reopening_the_database() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("monitorix.db");

    let node_id = {
        let h = sqlite_harness(&db).await;
        let node = h.add_node("pve1").await;
        h.add_rule(cpu_rule("CPU hot", 90.0, Severity::Critical)).await;
        h.gateway.script(
            "pve1",
            NodeScript::Online {
                usage: usage(95.0),
                vms: vec![vm(100, "db", 1.0)],
            },
        );
        h.monitor.check_node(&h.node(node.id).await).await.unwrap();
        h.monitor.sync_vms(&h.node(node.id).await).await.unwrap();
        node.id
    };

    let h = sqlite_harness(&db).await;
    let node = h.node(node_id).await;
    assert_eq!(node.status, NodeStatus::Online);
    assert_eq!(node.usage, Some(usage(95.0)));

    let open = h.open_alerts(AlertType::HighUsage).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].node_id, Some(node_id));

    let mut tx = h.store.begin().await.unwrap();
    let rules = tx.alert_rules().await.unwrap();
    assert!(rules[0].last_triggered.is_some());
    assert_eq!(tx.vms(node_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_repeated_vm_sync_keeps_one_row_per_vmid() {
    let dir = tempdir().unwrap();
    let h = sqlite_harness(&dir.path().join("monitorix.db")).await;
    let node = h.add_node("pve1").await;
    h.gateway.script(
        "pve1",
        NodeScript::Online {
            usage: usage(1.0),
            vms: vec![vm(100, "db", 1.0), vm(101, "web", 2.0)],
        },
    );

    let current = h.node(node.id).await;
    for _ in 0..3 {
        h.monitor.sync_vms(&current).await.unwrap();
    }

    let mut tx = h.store.begin().await.unwrap();
    assert_eq!(tx.vms(node.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_down_checks_open_one_alert() {
    let dir = tempdir().unwrap();
    let h = sqlite_harness(&dir.path().join("monitorix.db")).await;
    let service = h.add_service(command_service("flaky", "exit 1")).await;

    let checks = (0..4).map(|_| h.monitor.check_service(&service));
    for result in join_all(checks).await {
        result.unwrap();
    }

    assert_eq!(h.open_alerts(AlertType::ServiceDown).await.len(), 1);

    let uptime = h.monitor.service_uptime(service.id, 24).await.unwrap();
    assert_eq!(uptime.total_checks, 4);
    assert_eq!(uptime.uptime_percent, 0.0);
}

#[tokio::test]
async fn test_seeding_a_service_on_a_guest_that_was_never_synced() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("monitorix.db")).await.unwrap();
    let config = parse_config(
        r#"{
            "services": [{
                "name": "portal",
                "vm": 100,
                "check": {"type": "port", "host": "10.0.0.10", "port": 443}
            }]
        }"#,
    )
    .unwrap();

    let report = seed(&store, &config).await.unwrap();
    assert_eq!(report.services, 1);

    let mut tx = store.begin().await.unwrap();
    let services = tx.services().await.unwrap();
    assert_eq!(services[0].vmid, Some(100));
    assert!(tx.vm_by_vmid(100).await.unwrap().is_none());
}
