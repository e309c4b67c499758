use crate::models::NodeStatus;

/// Edge between two consecutive node observations
///
/// Alerts are edge-triggered: repeated observations of the same state never
/// produce anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTransition {
    /// `online -> offline`; opens a `node_down` incident
    WentOffline,

    /// Any other state into `online`; closes an open `node_down` incident
    CameOnline,

    NoEdge,
}

impl NodeTransition {
    pub fn between(previous: NodeStatus, current: NodeStatus) -> Self {
        match (previous, current) {
            (NodeStatus::Online, NodeStatus::Offline) => NodeTransition::WentOffline,
            (previous, NodeStatus::Online) if previous != NodeStatus::Online => {
                NodeTransition::CameOnline
            }
            _ => NodeTransition::NoEdge,
        }
    }
}
