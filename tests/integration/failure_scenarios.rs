//! Partial failures of remote targets and of retention

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use monitorix::config::RetentionConfig;
use monitorix::live::LiveEvent;
use monitorix::models::{AlertType, CheckKind, CheckStatus, MetricType, NewMetricSample, NodeStatus};
use monitorix::monitor::{NodeCheck, RetentionReport, ServiceCheck};
use monitorix::storage::{MemoryStore, MetricQuery};

use crate::helpers::*;

#[tokio::test]
async fn test_status_failure_marks_node_error_without_alert() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;
    h.gateway.script("pve1", online(10.0));
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();

    h.gateway.script("pve1", NodeScript::BrokenStatus);
    let check = h.monitor.check_node(&h.node(node.id).await).await.unwrap();

    assert_matches!(check, NodeCheck::Error(msg) if msg.contains("500"));
    let stored = h.node(node.id).await;
    assert_eq!(stored.status, NodeStatus::Error);
    // usage of the last good poll is kept
    assert_eq!(stored.usage, Some(usage(10.0)));
    assert!(h.alerts().await.is_empty());
}

#[tokio::test]
async fn test_guest_listing_failure_surfaces_as_error() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;
    h.gateway.script("pve1", NodeScript::BrokenGuests { usage: usage(1.0) });

    let err = h.monitor.sync_vms(&h.node(node.id).await).await.unwrap_err();
    assert!(format!("{err:#}").contains("failed to list guests of node pve1"));
}

#[tokio::test]
async fn test_unreachable_http_service_is_down_with_alert() {
    let h = Harness::new();
    let mut service = command_service("web", "unused");
    // nothing listens on port 9 of localhost
    service.check = CheckKind::Http {
        url: "http://127.0.0.1:9/health".to_string(),
        expected_status: 200,
    };
    service.timeout = 2;
    let service = h.add_service(service).await;

    let check = h.monitor.check_service(&service).await.unwrap();
    assert_matches!(check, ServiceCheck::Checked(result) if result.status == CheckStatus::Down);
    assert_eq!(h.open_alerts(AlertType::ServiceDown).await.len(), 1);

    assert_matches!(
        h.sink.events().last(),
        Some(LiveEvent::ServiceUpdate { status: CheckStatus::Down, response_time: None, .. })
    );
}

#[tokio::test]
async fn test_closed_port_reports_not_open() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let h = Harness::new();
    let mut service = command_service("db", "unused");
    service.check = CheckKind::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    };
    service.timeout = 1;
    let service = h.add_service(service).await;

    let check = h.monitor.check_service(&service).await.unwrap();
    let ServiceCheck::Checked(result) = check else {
        panic!("service was skipped");
    };
    assert_eq!(result.status, CheckStatus::Down);
    assert_eq!(result.response_time_ms, None);
    assert!(result.error_message.unwrap().contains("not open"));
}

#[tokio::test]
async fn test_service_removed_during_check_is_discarded() {
    let h = Harness::new();
    let service = h.add_service(command_service("ghost", "exit 1")).await;
    let mut stale = service.clone();
    stale.id = 999;

    assert_eq!(
        h.monitor.check_service(&stale).await.unwrap(),
        ServiceCheck::Skipped
    );
    assert!(h.alerts().await.is_empty());
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_retention_prunes_old_samples_only() {
    let retention = RetentionConfig {
        enabled: true,
        metrics_retention_days: 7,
        health_check_retention_days: Some(7),
    };
    let h = Harness::with_retention(Arc::new(MemoryStore::new()), retention);
    let node = h.add_node("pve1").await;
    let now = Utc::now();

    let mut tx = h.store.begin().await.unwrap();
    tx.append_metrics(&[
        NewMetricSample::percent(MetricType::Cpu, 1.0, Some(node.id), None, now - Duration::days(30)),
        NewMetricSample::percent(MetricType::Cpu, 2.0, Some(node.id), None, now - Duration::days(8)),
        NewMetricSample::percent(MetricType::Cpu, 3.0, Some(node.id), None, now - Duration::days(1)),
    ])
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let report = h.monitor.run_retention().await.unwrap();
    assert_eq!(
        report,
        Some(RetentionReport {
            metrics_deleted: 2,
            health_checks_deleted: 0,
        })
    );

    let mut tx = h.store.begin().await.unwrap();
    let left = tx
        .metrics(MetricQuery {
            node_id: Some(node.id),
            vm_id: None,
            metric_type: MetricType::Cpu,
            since: now - Duration::days(365),
        })
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].value, 3.0);
}

#[tokio::test]
async fn test_disabled_retention_deletes_nothing() {
    let retention = RetentionConfig {
        enabled: false,
        ..RetentionConfig::default()
    };
    let h = Harness::with_retention(Arc::new(MemoryStore::new()), retention);

    assert_eq!(h.monitor.run_retention().await.unwrap(), None);
}
