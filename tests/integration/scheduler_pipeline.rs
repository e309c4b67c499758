//! End-to-end behaviour of the per-target units of work and the job actors

use assert_matches::assert_matches;
use futures::future::join_all;
use monitorix::config::SchedulerConfig;
use monitorix::live::LiveEvent;
use monitorix::models::{AlertType, CheckStatus, MetricType, NodeStatus, Severity};
use monitorix::monitor::{NodeCheck, ServiceCheck, VmSync};
use monitorix::scheduler::Scheduler;
use monitorix::storage::{MetricQuery, StorageError};
use pretty_assertions::assert_eq;

use crate::helpers::*;

/// Intervals long enough that only explicit runs happen during a test
fn manual_only() -> SchedulerConfig {
    SchedulerConfig {
        node_interval_secs: 3600,
        service_interval_secs: 3600,
        retention_interval_secs: 3600,
    }
}

#[tokio::test]
async fn test_node_down_alert_raised_once_per_outage() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;

    h.gateway.script("pve1", online(10.0));
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();

    h.gateway.script("pve1", NodeScript::Offline);
    for _ in 0..3 {
        let check = h.monitor.check_node(&h.node(node.id).await).await.unwrap();
        assert_eq!(check, NodeCheck::Offline);
    }

    let open = h.open_alerts(AlertType::NodeDown).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].node_id, Some(node.id));
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].title, "Node pve1 is offline");
    assert_eq!(open[0].message, "Node pve1 is no longer responding");
    assert_eq!(h.sink.alerts().len(), 1);

    let stored = h.node(node.id).await;
    assert_eq!(stored.status, NodeStatus::Offline);
    assert!(stored.last_check.is_some());
}

#[tokio::test]
async fn test_recovery_resolves_node_down_and_next_outage_opens_a_new_one() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;

    for script in [online(10.0), NodeScript::Offline, online(10.0), NodeScript::Offline] {
        h.gateway.script("pve1", script);
        h.monitor.check_node(&h.node(node.id).await).await.unwrap();
    }

    let node_down: Vec<_> = h
        .alerts()
        .await
        .into_iter()
        .filter(|alert| alert.alert_type == AlertType::NodeDown)
        .collect();
    assert_eq!(node_down.len(), 2);
    assert_eq!(node_down.iter().filter(|a| a.is_resolved).count(), 1);
    assert_eq!(h.open_alerts(AlertType::NodeDown).await.len(), 1);
}

#[tokio::test]
async fn test_first_offline_poll_of_unknown_node_is_not_an_edge() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;

    h.gateway.script("pve1", NodeScript::Offline);
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();

    assert!(h.alerts().await.is_empty());
    assert_eq!(h.node(node.id).await.status, NodeStatus::Offline);
}

#[tokio::test]
async fn test_online_poll_records_usage_and_metrics() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;
    h.gateway.script("pve1", online(42.5));

    let check = h.monitor.check_node(&h.node(node.id).await).await.unwrap();
    assert_matches!(check, NodeCheck::Online(usage) if usage.cpu_usage == 42.5);

    let stored = h.node(node.id).await;
    assert_eq!(stored.status, NodeStatus::Online);
    assert_eq!(stored.usage, Some(usage(42.5)));

    let mut tx = h.store.begin().await.unwrap();
    for (metric_type, value) in [
        (MetricType::Cpu, 42.5),
        (MetricType::Memory, 25.0),
        (MetricType::Disk, 10.0),
    ] {
        let samples = tx
            .metrics(MetricQuery {
                node_id: Some(node.id),
                vm_id: None,
                metric_type,
                since: chrono::Utc::now() - chrono::Duration::minutes(1),
            })
            .await
            .unwrap();
        assert_eq!(samples.len(), 1, "{metric_type}");
        assert_eq!(samples[0].value, value);
        assert_eq!(samples[0].unit, "percent");
    }

    assert_matches!(
        h.sink.events().as_slice(),
        [LiveEvent::NodeUpdate { node_id, status: NodeStatus::Online, .. }] if *node_id == node.id
    );
}

#[tokio::test]
async fn test_vm_sync_is_idempotent_and_keeps_unseen_guests() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;
    h.gateway.script(
        "pve1",
        NodeScript::Online {
            usage: usage(5.0),
            vms: vec![vm(100, "db", 20.0), vm(101, "web", 30.0)],
        },
    );

    let current = h.node(node.id).await;
    assert_eq!(
        h.monitor.sync_vms(&current).await.unwrap(),
        VmSync::Synced { vm_count: 2 }
    );
    h.monitor.sync_vms(&current).await.unwrap();

    h.gateway.script(
        "pve1",
        NodeScript::Online {
            usage: usage(5.0),
            vms: vec![vm(100, "db-renamed", 50.0)],
        },
    );
    h.monitor.sync_vms(&current).await.unwrap();

    let mut tx = h.store.begin().await.unwrap();
    let mut vms = tx.vms(node.id).await.unwrap();
    vms.sort_by_key(|vm| vm.vmid);

    assert_eq!(vms.len(), 2);
    assert_eq!(vms[0].name, "db-renamed");
    assert_eq!(vms[0].cpu_usage, 50.0);
    assert_eq!(vms[1].name, "web");
}

#[tokio::test]
async fn test_cpu_rule_fires_once_then_cools_down() {
    let h = Harness::new();
    let node = h.add_node("pve7").await;
    h.add_rule(cpu_rule("CPU hot", 90.0, Severity::Critical)).await;

    h.gateway.script("pve7", online(95.0));
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();

    let open = h.open_alerts(AlertType::HighUsage).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].node_id, Some(node.id));
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].title, "CPU hot - CPU threshold exceeded");
    assert_eq!(
        open[0].message,
        "CPU is 95.00% (threshold: > 90%) on node pve7"
    );

    let mut tx = h.store.begin().await.unwrap();
    let rules = tx.alert_rules().await.unwrap();
    assert!(rules[0].last_triggered.is_some());
    drop(tx);

    h.gateway.script("pve7", online(96.0));
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();
    assert_eq!(h.alerts().await.len(), 1);
}

#[tokio::test]
async fn test_vm_metrics_evaluate_with_vm_scope() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;
    h.add_rule(cpu_rule("guest CPU", 80.0, Severity::Warning)).await;
    h.gateway.script(
        "pve1",
        NodeScript::Online {
            usage: usage(5.0),
            vms: vec![vm(100, "db", 85.0)],
        },
    );

    h.monitor.sync_vms(&h.node(node.id).await).await.unwrap();

    let open = h.open_alerts(AlertType::HighUsage).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].node_id, Some(node.id));
    assert!(open[0].vm_id.is_some());
    assert!(open[0].message.ends_with("on node pve1 (VM: db)"));
}

#[tokio::test]
async fn test_consecutive_down_results_keep_one_open_alert() {
    let h = Harness::new();
    let service = h.add_service(command_service("backup", "exit 1")).await;

    for _ in 0..3 {
        let check = h.monitor.check_service(&service).await.unwrap();
        assert_matches!(check, ServiceCheck::Checked(result) if result.status == CheckStatus::Down);
    }

    let open = h.open_alerts(AlertType::ServiceDown).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].service_id, Some(service.id));
    assert_eq!(open[0].title, "Service backup is down");
    assert_eq!(open[0].message, "Command exited with code 1");
}

#[tokio::test]
async fn test_service_recovery_resolves_and_next_failure_reopens() {
    let h = Harness::new();
    let failing = h.add_service(command_service("api", "exit 1")).await;
    h.monitor.check_service(&failing).await.unwrap();

    // same record, now passing
    let mut passing = failing.clone();
    passing.check = command_service("api", "exit 0").check;
    h.monitor.check_service(&passing).await.unwrap();
    assert!(h.open_alerts(AlertType::ServiceDown).await.is_empty());

    h.monitor.check_service(&failing).await.unwrap();
    let all = h.alerts().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|alert| alert.is_resolved).count(), 1);
}

#[tokio::test]
async fn test_concurrent_manual_checks_do_not_double_alert() {
    let h = Harness::new();
    let service = h.add_service(command_service("flaky", "exit 3")).await;

    let checks = (0..5).map(|_| h.monitor.check_service(&service));
    for result in join_all(checks).await {
        result.unwrap();
    }

    assert_eq!(h.open_alerts(AlertType::ServiceDown).await.len(), 1);
    assert_eq!(h.sink.alerts().len(), 1);
}

#[tokio::test]
async fn test_maintenance_targets_are_skipped_on_every_path() {
    let h = Harness::new();
    let mut new = new_node("pve-maint");
    new.maintenance_mode = true;
    let node = {
        let mut tx = h.store.begin().await.unwrap();
        let node = tx.insert_node(new).await.unwrap();
        tx.commit().await.unwrap();
        node
    };
    let mut svc = command_service("paused", "exit 1");
    svc.maintenance_mode = true;
    let service = h.add_service(svc).await;

    let scheduler = Scheduler::start(h.monitor.clone(), &manual_only());
    assert_eq!(scheduler.check_node(node.id).await.unwrap(), NodeCheck::Skipped);
    assert_eq!(scheduler.sync_vms(node.id).await.unwrap(), VmSync::Skipped);
    assert_eq!(
        scheduler.check_service(service.id).await.unwrap(),
        ServiceCheck::Skipped
    );

    let report = scheduler.run_node_job().await.unwrap();
    assert_eq!(report.targets, 0);
    scheduler.stop().await;

    assert!(h.alerts().await.is_empty());
    assert!(h.sink.events().is_empty());
    assert_eq!(h.node(node.id).await.status, NodeStatus::Unknown);
}

#[tokio::test]
async fn test_node_job_isolates_failing_nodes() {
    let h = Harness::new();
    let healthy = h.add_node("healthy").await;
    h.add_node("broken").await;
    h.gateway.script(
        "healthy",
        NodeScript::Online {
            usage: usage(5.0),
            vms: vec![vm(100, "db", 1.0)],
        },
    );
    h.gateway.script("broken", NodeScript::BrokenGuests { usage: usage(5.0) });

    let scheduler = Scheduler::start(h.monitor.clone(), &manual_only());
    let report = scheduler.run_node_job().await.unwrap();
    scheduler.stop().await;

    assert_eq!(report.job, "node-poll");
    assert_eq!(report.targets, 2);
    assert_eq!(report.failures, 1);

    assert_eq!(h.node(healthy.id).await.status, NodeStatus::Online);
    let mut tx = h.store.begin().await.unwrap();
    assert_eq!(tx.vms(healthy.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_service_job_honours_check_interval() {
    let h = Harness::new();
    let mut slow = command_service("slow", "exit 0");
    slow.check_interval = 3600;
    let slow = h.add_service(slow).await;

    let scheduler = Scheduler::start(h.monitor.clone(), &manual_only());
    let first = scheduler.run_service_job().await.unwrap();
    let second = scheduler.run_service_job().await.unwrap();
    scheduler.stop().await;

    assert_eq!(first.targets, 1);
    assert_eq!(second.targets, 0);

    let uptime = h.monitor.service_uptime(slow.id, 1).await.unwrap();
    assert_eq!(uptime.total_checks, 1);
    assert_eq!(uptime.uptime_percent, 100.0);
}

#[tokio::test]
async fn test_on_demand_check_of_missing_record_is_not_found() {
    let h = Harness::new();
    let scheduler = Scheduler::start(h.monitor.clone(), &manual_only());

    let err = scheduler.check_node(404).await.unwrap_err();
    assert_matches!(err.downcast_ref::<StorageError>(), Some(StorageError::NotFound(_)));

    let err = scheduler.check_service(404).await.unwrap_err();
    assert_matches!(err.downcast_ref::<StorageError>(), Some(StorageError::NotFound(_)));

    scheduler.stop().await;
}
