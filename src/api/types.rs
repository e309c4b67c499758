//! API response types

use serde::Serialize;

use crate::models::{HealthCheckResult, NodeStatus, NodeUsage};
use crate::monitor::{NodeCheck, ServiceCheck, VmSync};
use crate::uptime::ServiceUptime;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: &'static str,
}

/// Outcome of `POST /api/v1/nodes/:id/check`
#[derive(Debug, Clone, Serialize)]
pub struct NodeCheckResponse {
    pub node_id: i64,
    /// `false` when the node is inactive or in maintenance
    pub checked: bool,
    pub status: Option<NodeStatus>,
    pub usage: Option<NodeUsage>,
    pub error: Option<String>,
}

impl NodeCheckResponse {
    pub fn new(node_id: i64, check: NodeCheck) -> Self {
        let (checked, status, usage, error) = match check {
            NodeCheck::Skipped => (false, None, None, None),
            NodeCheck::Online(usage) => (true, Some(NodeStatus::Online), Some(usage), None),
            NodeCheck::Offline => (true, Some(NodeStatus::Offline), None, None),
            NodeCheck::Error(e) => (true, Some(NodeStatus::Error), None, Some(e)),
        };
        Self {
            node_id,
            checked,
            status,
            usage,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VmSyncResponse {
    pub node_id: i64,
    pub synced: bool,
    pub vm_count: usize,
}

impl VmSyncResponse {
    pub fn new(node_id: i64, sync: VmSync) -> Self {
        match sync {
            VmSync::Skipped => Self {
                node_id,
                synced: false,
                vm_count: 0,
            },
            VmSync::Synced { vm_count } => Self {
                node_id,
                synced: true,
                vm_count,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceCheckResponse {
    pub service_id: i64,
    pub checked: bool,
    pub result: Option<HealthCheckResult>,
}

impl ServiceCheckResponse {
    pub fn new(service_id: i64, check: ServiceCheck) -> Self {
        let result = match check {
            ServiceCheck::Skipped => None,
            ServiceCheck::Checked(result) => Some(result),
        };
        Self {
            service_id,
            checked: result.is_some(),
            result,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeResponse {
    #[serde(flatten)]
    pub uptime: ServiceUptime,
    pub uptime_formatted: String,
    pub downtime_formatted: String,
}
