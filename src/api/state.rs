//! Shared state passed to all API handlers

use std::sync::Arc;

use crate::live::LiveUpdateBroadcaster;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct ApiState {
    /// On-demand access to the same units of work the periodic jobs run
    pub scheduler: Arc<Scheduler>,

    /// Registry websocket clients subscribe to
    pub live: Arc<LiveUpdateBroadcaster>,
}

impl ApiState {
    pub fn new(scheduler: Arc<Scheduler>, live: Arc<LiveUpdateBroadcaster>) -> Self {
        Self { scheduler, live }
    }
}
