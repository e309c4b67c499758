//! Access to the Proxmox VE API
//!
//! The scheduler only depends on [`ProxmoxGateway`]; [`ProxmoxClient`] is the
//! reqwest implementation talking to `/api2/json` with API token auth.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};

use crate::models::{MonitoredNode, NodeUsage, VmKind, VmSnapshot};

/// Node status and guest inventory of one Proxmox node
#[async_trait]
pub trait ProxmoxGateway: Send + Sync {
    /// Succeeds when the API answers with the node's credentials
    async fn test_connection(&self, node: &MonitoredNode) -> anyhow::Result<()>;

    async fn node_status(&self, node: &MonitoredNode) -> anyhow::Result<NodeUsage>;

    /// Every QEMU VM and LXC container with current usage figures
    async fn list_vms(&self, node: &MonitoredNode) -> anyhow::Result<Vec<VmSnapshot>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    node: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    used: f64,
    #[serde(default)]
    total: f64,
}

#[derive(Debug, Deserialize)]
struct NodeStatusData {
    /// Fraction of one, not percent
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: Usage,
    #[serde(default)]
    rootfs: Usage,
    #[serde(default)]
    uptime: f64,
}

#[derive(Debug, Deserialize)]
struct GuestEntry {
    vmid: u32,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuestStatus {
    #[serde(default = "unknown_status")]
    status: String,
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    mem: f64,
    #[serde(default)]
    maxmem: f64,
    #[serde(default)]
    disk: f64,
    #[serde(default)]
    maxdisk: f64,
    #[serde(default)]
    uptime: f64,
}

fn unknown_status() -> String {
    "unknown".to_string()
}

/// `PVEAPIToken=user@realm!tokenid=secret`; a bare secret uses the user
/// name as token id
pub fn authorization_header(username: &str, token: &str) -> String {
    if token.contains('=') {
        format!("PVEAPIToken={username}!{token}")
    } else {
        let token_id = username.split('@').next().unwrap_or(username);
        format!("PVEAPIToken={username}!{token_id}={token}")
    }
}

#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    verifying: Client,
    /// For nodes configured with `verify_ssl: false`
    trusting: Client,
}

impl ProxmoxClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let build = |accept_invalid_certs: bool| {
            Client::builder()
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .context("failed to build Proxmox HTTP client")
        };

        Ok(Self {
            verifying: build(false)?,
            trusting: build(true)?,
        })
    }

    async fn get<T: DeserializeOwned>(&self, node: &MonitoredNode, path: &str) -> anyhow::Result<T> {
        let client = if node.verify_ssl {
            &self.verifying
        } else {
            &self.trusting
        };
        let url = format!("{}/api2/json{path}", node.url.trim_end_matches('/'));
        trace!("GET {url}");

        let response = client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                authorization_header(&node.username, &node.token),
            )
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error"))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("unexpected response from {url}"))?;
        Ok(envelope.data)
    }

    async fn cluster_nodes(&self, node: &MonitoredNode) -> anyhow::Result<Vec<String>> {
        let entries: Vec<NodeEntry> = self.get(node, "/nodes").await?;
        Ok(entries.into_iter().map(|entry| entry.node).collect())
    }

    async fn guests(
        &self,
        node: &MonitoredNode,
        cluster_node: &str,
        kind: VmKind,
    ) -> anyhow::Result<Vec<VmSnapshot>> {
        let base = format!("/nodes/{cluster_node}/{kind}");
        let entries: Vec<GuestEntry> = self.get(node, &base).await?;

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            let status: GuestStatus = self
                .get(node, &format!("{base}/{}/status/current", entry.vmid))
                .await?;

            snapshots.push(VmSnapshot {
                vmid: entry.vmid,
                name: entry.name,
                kind,
                status: status.status,
                cpu_usage: status.cpu * 100.0,
                memory_used: status.mem as u64,
                memory_total: status.maxmem as u64,
                disk_used: status.disk as u64,
                disk_total: status.maxdisk as u64,
                uptime: status.uptime as u64,
            });
        }
        Ok(snapshots)
    }
}

#[async_trait]
impl ProxmoxGateway for ProxmoxClient {
    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn test_connection(&self, node: &MonitoredNode) -> anyhow::Result<()> {
        let version: serde_json::Value = self.get(node, "/version").await?;
        debug!("connected, Proxmox version {}", version["version"]);
        Ok(())
    }

    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn node_status(&self, node: &MonitoredNode) -> anyhow::Result<NodeUsage> {
        // the first cluster member answers for the configured endpoint
        let Some(cluster_node) = self.cluster_nodes(node).await?.into_iter().next() else {
            bail!("no nodes found");
        };

        let status: NodeStatusData = self
            .get(node, &format!("/nodes/{cluster_node}/status"))
            .await?;

        Ok(NodeUsage {
            cpu_usage: status.cpu * 100.0,
            memory_used: status.memory.used as u64,
            memory_total: status.memory.total as u64,
            disk_used: status.rootfs.used as u64,
            disk_total: status.rootfs.total as u64,
            uptime: status.uptime as u64,
        })
    }

    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn list_vms(&self, node: &MonitoredNode) -> anyhow::Result<Vec<VmSnapshot>> {
        let mut vms = Vec::new();
        for cluster_node in self.cluster_nodes(node).await? {
            vms.extend(self.guests(node, &cluster_node, VmKind::Qemu).await?);
            vms.extend(self.guests(node, &cluster_node, VmKind::Lxc).await?);
        }
        debug!("found {} guests", vms.len());
        Ok(vms)
    }
}
