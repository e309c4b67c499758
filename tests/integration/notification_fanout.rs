//! Notification delivery driven by real alert transitions

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use monitorix::config::EmailConfig;
use monitorix::models::{
    Alert, AlertType, ChannelKind, NewNotificationChannel, NewWebhook, Severity, SubjectNames,
};
use monitorix::notify::{AlertContext, DispatchSummary, Notifier};
use monitorix::storage::{MemoryStore, Store};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn channel(name: &str, kind: ChannelKind, url: String) -> NewNotificationChannel {
    NewNotificationChannel {
        name: name.to_string(),
        kind,
        webhook_url: url,
        alert_types: Vec::new(),
        severity_filter: Vec::new(),
        is_active: true,
    }
}

fn webhook(name: &str, url: String) -> NewWebhook {
    NewWebhook {
        name: name.to_string(),
        url,
        method: "POST".to_string(),
        headers: HashMap::new(),
        alert_types: Vec::new(),
        is_active: true,
    }
}

async fn add_channel(h: &Harness, channel: NewNotificationChannel) {
    let mut tx = h.store.begin().await.unwrap();
    tx.insert_notification_channel(channel).await.unwrap();
    tx.commit().await.unwrap();
}

async fn add_webhook(h: &Harness, webhook: NewWebhook) {
    let mut tx = h.store.begin().await.unwrap();
    tx.insert_webhook(webhook).await.unwrap();
    tx.commit().await.unwrap();
}

/// Breach a global CPU rule on a fresh node
async fn trigger_high_usage(h: &Harness) {
    let node = h.add_node("pve1").await;
    h.add_rule(cpu_rule("CPU hot", 90.0, Severity::Critical)).await;
    h.gateway.script("pve1", online(95.0));
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();
}

#[tokio::test]
async fn test_filtered_channel_is_skipped_while_unfiltered_one_is_called() {
    let filtered = MockServer::start().await;
    let unfiltered = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&filtered)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&unfiltered)
        .await;

    let h = Harness::new();
    let mut only_service_down =
        channel("outages", ChannelKind::Slack, format!("{}/hook", filtered.uri()));
    only_service_down.alert_types = vec!["service_down".to_string()];
    add_channel(&h, only_service_down).await;
    add_channel(
        &h,
        channel("everything", ChannelKind::Slack, format!("{}/hook", unfiltered.uri())),
    )
    .await;

    trigger_high_usage(&h).await;
}

#[tokio::test]
async fn test_severity_filter_excludes_lower_severities() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = Harness::new();
    let mut critical_only = channel("pager", ChannelKind::Discord, server.uri());
    critical_only.severity_filter = vec!["critical".to_string()];
    add_channel(&h, critical_only).await;

    let node = h.add_node("pve1").await;
    h.add_rule(cpu_rule("CPU warm", 50.0, Severity::Warning)).await;
    h.gateway.script("pve1", online(60.0));
    h.monitor.check_node(&h.node(node.id).await).await.unwrap();

    assert_eq!(h.alerts().await.len(), 1);
}

#[tokio::test]
async fn test_slack_and_discord_payloads() {
    let slack = MockServer::start().await;
    let discord = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "attachments": [{
                "color": "#dc3545",
                "title": "🔴 CPU hot - CPU threshold exceeded",
                "footer": "Monitorix"
            }]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&slack)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "embeds": [{
                "color": 0xdc3545,
                "fields": [
                    {"name": "Alert Type", "value": "high_usage", "inline": true},
                    {"name": "Severity", "value": "CRITICAL", "inline": true}
                ],
                "footer": {"text": "Monitorix"}
            }]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&discord)
        .await;

    let h = Harness::new();
    add_channel(&h, channel("slack", ChannelKind::Slack, slack.uri())).await;
    add_channel(&h, channel("discord", ChannelKind::Discord, discord.uri())).await;

    trigger_high_usage(&h).await;
}

#[tokio::test]
async fn test_webhook_payload_method_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/alerts"))
        .and(header("X-Token", "abc"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({
            "alert_type": "service_down",
            "severity": "critical",
            "title": "Service backup is down",
            "service_name": "backup",
            "node_name": null,
            "vm_name": null
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new();
    let mut hook = webhook("ops", format!("{}/alerts", server.uri()));
    hook.method = "PUT".to_string();
    hook.headers.insert("X-Token".to_string(), "abc".to_string());
    add_webhook(&h, hook).await;

    // only node_down alerts; must not be called
    let mut other = webhook("nodes-only", format!("{}/other", server.uri()));
    other.alert_types = vec!["node_down".to_string()];
    add_webhook(&h, other).await;

    let service = h.add_service(command_service("backup", "exit 1")).await;
    h.monitor.check_service(&service).await.unwrap();
}

#[tokio::test]
async fn test_failing_webhook_does_not_block_channels() {
    let broken = MockServer::start().await;
    let chat = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&broken)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&chat)
        .await;

    let h = Harness::new();
    add_webhook(&h, webhook("broken", broken.uri())).await;
    add_channel(&h, channel("chat", ChannelKind::Slack, chat.uri())).await;

    trigger_high_usage(&h).await;

    // the alert stands regardless of delivery
    assert_eq!(h.alerts().await.len(), 1);
    assert_eq!(h.sink.alerts().len(), 1);
}

#[tokio::test]
async fn test_inactive_targets_are_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = Harness::new();
    let mut hook = webhook("off", server.uri());
    hook.is_active = false;
    add_webhook(&h, hook).await;
    let mut chat = channel("off", ChannelKind::Discord, server.uri());
    chat.is_active = false;
    add_channel(&h, chat).await;

    trigger_high_usage(&h).await;
}

#[tokio::test]
async fn test_service_down_names_the_guest_once_it_is_synced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "alert_type": "service_down",
            "service_name": "portal",
            "vm_name": "web01",
            "node_name": "pve1",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new();
    add_webhook(&h, webhook("pager", format!("{}/hook", server.uri()))).await;

    let mut linked = command_service("portal", "exit 1");
    linked.vmid = Some(100);
    let service = h.add_service(linked).await;

    let node = h.add_node("pve1").await;
    h.gateway.script(
        "pve1",
        NodeScript::Online {
            usage: usage(5.0),
            vms: vec![vm(100, "web01", 1.0)],
        },
    );
    h.monitor.sync_vms(&h.node(node.id).await).await.unwrap();

    h.monitor.check_service(&service).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_smtp_server_does_not_block_webhooks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // a port nobody listens on
    let closed_port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut tx = store.begin().await.unwrap();
    tx.insert_webhook(webhook("pager", format!("{}/hook", server.uri())))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let email = EmailConfig {
        enabled: true,
        smtp_host: Some("127.0.0.1".to_string()),
        smtp_port: closed_port,
        smtp_user: Some("monitor".to_string()),
        smtp_password: Some("secret".to_string()),
        from: Some("monitorix@example.org".to_string()),
        to: Some("ops@example.org".to_string()),
    };
    let notifier = Notifier::new(store, Some(&email)).unwrap();

    let context = AlertContext {
        alert: Alert {
            id: 1,
            alert_type: AlertType::NodeDown,
            severity: Severity::Critical,
            title: "Node pve1 is offline".to_string(),
            message: "Connection test failed".to_string(),
            node_id: Some(1),
            vm_id: None,
            service_id: None,
            is_resolved: false,
            resolved_at: None,
            created_at: Utc::now(),
        },
        subject: SubjectNames {
            node: Some("pve1".to_string()),
            ..Default::default()
        },
    };

    let summary = notifier.dispatch(&context).await;
    assert_eq!(
        summary,
        DispatchSummary {
            delivered: 1,
            failed: 1,
        }
    );
}
