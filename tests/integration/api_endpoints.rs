//! HTTP endpoints served over a real socket

use std::net::SocketAddr;
use std::sync::Arc;

use monitorix::api::{ApiConfig, ApiState, spawn_api_server};
use monitorix::config::SchedulerConfig;
use monitorix::live::LiveUpdateBroadcaster;
use monitorix::scheduler::Scheduler;
use reqwest::StatusCode;
use serde_json::Value;

use crate::helpers::*;

const TOKEN: &str = "test-token";

async fn spawn_test_api(h: &Harness) -> SocketAddr {
    let scheduler = Arc::new(Scheduler::start(
        h.monitor.clone(),
        &SchedulerConfig {
            node_interval_secs: 3600,
            service_interval_secs: 3600,
            retention_interval_secs: 3600,
        },
    ));
    let state = ApiState::new(scheduler, Arc::new(LiveUpdateBroadcaster::new()));

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some(TOKEN.to_string()),
        enable_cors: true,
    };
    spawn_api_server(config, state).await.unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_health_requires_token() {
    let h = Harness::new();
    let addr = spawn_test_api(&h).await;
    let url = format!("http://{addr}/api/v1/health");

    let response = client().get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client()
        .get(&url)
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client().get(&url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_manual_service_check_and_uptime() {
    let h = Harness::new();
    let service = h.add_service(command_service("nightly", "exit 0")).await;
    let addr = spawn_test_api(&h).await;

    let response = client()
        .post(format!("http://{addr}/api/v1/services/{}/check", service.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["checked"], true);
    assert_eq!(body["result"]["status"], "up");

    let response = client()
        .get(format!("http://{addr}/api/v1/services/{}/uptime?hours=1", service.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total_checks"], 1);
    assert_eq!(body["uptime_percent"], 100.0);
    assert_eq!(body["uptime_formatted"], "99.9%");
    assert_eq!(body["downtime_formatted"], "0s");
}

#[tokio::test]
async fn test_manual_node_check_and_sync() {
    let h = Harness::new();
    let node = h.add_node("pve1").await;
    h.gateway.script(
        "pve1",
        NodeScript::Online {
            usage: usage(12.0),
            vms: vec![vm(100, "db", 1.0)],
        },
    );
    let addr = spawn_test_api(&h).await;

    let body: Value = client()
        .post(format!("http://{addr}/api/v1/nodes/{}/check", node.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "online");
    assert_eq!(body["usage"]["cpu_usage"], 12.0);

    let body: Value = client()
        .post(format!("http://{addr}/api/v1/nodes/{}/sync", node.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["synced"], true);
    assert_eq!(body["vm_count"], 1);
}

#[tokio::test]
async fn test_unknown_records_and_jobs_are_404() {
    let h = Harness::new();
    let addr = spawn_test_api(&h).await;

    for (method, path) in [
        (reqwest::Method::POST, "/api/v1/nodes/77/check"),
        (reqwest::Method::POST, "/api/v1/services/77/check"),
        (reqwest::Method::GET, "/api/v1/services/77/uptime"),
        (reqwest::Method::POST, "/api/v1/jobs/backups/run"),
    ] {
        let response = client()
            .request(method, format!("http://{addr}{path}"))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}

#[tokio::test]
async fn test_uptime_window_is_validated() {
    let h = Harness::new();
    let service = h.add_service(command_service("svc", "exit 0")).await;
    let addr = spawn_test_api(&h).await;

    let response = client()
        .get(format!("http://{addr}/api/v1/services/{}/uptime?hours=0", service.id))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_job_run_returns_report() {
    let h = Harness::new();
    h.add_service(command_service("svc", "exit 0")).await;
    let addr = spawn_test_api(&h).await;

    let body: Value = client()
        .post(format!("http://{addr}/api/v1/jobs/services/run"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["job"], "service-poll");
    assert_eq!(body["targets"], 1);
    assert_eq!(body["failures"], 0);
}
