//! Live update events and the in-process subscriber registry
//!
//! The scheduler only knows the [`LiveUpdateSink`] trait; whoever hosts the
//! core decides where events go. [`LiveUpdateBroadcaster`] is the sink used by
//! the API, feeding one bounded queue per connected websocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::models::{Alert, CheckStatus, NodeStatus};

/// Per-subscriber queue length; a subscriber this far behind is dropped
const SUBSCRIBER_QUEUE_SIZE: usize = 64;

/// A state change worth pushing to live subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    NodeUpdate {
        node_id: i64,
        status: NodeStatus,
        last_check: DateTime<Utc>,
    },
    VmsUpdate {
        node_id: i64,
        vm_count: usize,
    },
    ServiceUpdate {
        service_id: i64,
        status: CheckStatus,
        response_time: Option<f64>,
    },
    Alert(Alert),
}

impl LiveEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LiveEvent::NodeUpdate { .. } => "node_update",
            LiveEvent::VmsUpdate { .. } => "vms_update",
            LiveEvent::ServiceUpdate { .. } => "service_update",
            LiveEvent::Alert(_) => "alert",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            LiveEvent::NodeUpdate {
                node_id,
                status,
                last_check,
            } => json!({
                "node_id": node_id,
                "status": status,
                "last_check": last_check.to_rfc3339(),
            }),
            LiveEvent::VmsUpdate { node_id, vm_count } => json!({
                "node_id": node_id,
                "vm_count": vm_count,
            }),
            LiveEvent::ServiceUpdate {
                service_id,
                status,
                response_time,
            } => json!({
                "service_id": service_id,
                "status": status,
                "response_time": response_time,
            }),
            LiveEvent::Alert(alert) => json!({
                "id": alert.id,
                "alert_type": alert.alert_type,
                "severity": alert.severity,
                "title": alert.title,
                "message": alert.message,
                "node_id": alert.node_id,
                "vm_id": alert.vm_id,
                "service_id": alert.service_id,
                "created_at": alert.created_at.to_rfc3339(),
            }),
        }
    }

    /// Wire form: `{"type": ..., "data": ..., "timestamp": ...}`
    pub fn envelope(&self, timestamp: DateTime<Utc>) -> Value {
        json!({
            "type": self.event_type(),
            "data": self.data(),
            "timestamp": timestamp.to_rfc3339(),
        })
    }
}

/// Destination of live events, injected into the scheduler at construction
#[async_trait]
pub trait LiveUpdateSink: Send + Sync {
    /// Best effort; never fails the caller
    async fn broadcast(&self, event: LiveEvent);
}

#[derive(Debug, Clone)]
struct Subscriber {
    id: u64,
    sender: mpsc::Sender<String>,
}

/// A registered subscriber's end of the registry
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<String>,
}

/// Registry of live subscribers
///
/// A broadcast sends to a snapshot of the registry; subscribers whose queue
/// is closed or full are removed in a second pass afterwards.
#[derive(Debug, Default)]
pub struct LiveUpdateBroadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl LiveUpdateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_SIZE);

        self.lock().push(Subscriber { id, sender });
        debug!("live subscriber {id} connected");

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().retain(|subscriber| subscriber.id != id);
        debug!("live subscriber {id} disconnected");
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Send an already serialised message to every subscriber, returning how
    /// many accepted it
    pub fn publish(&self, message: &str) -> usize {
        let snapshot = self.lock().clone();

        let mut dead = Vec::new();
        for subscriber in &snapshot {
            if let Err(e) = subscriber.sender.try_send(message.to_string()) {
                trace!("live subscriber {} dropped: {e}", subscriber.id);
                dead.push(subscriber.id);
            }
        }

        if !dead.is_empty() {
            self.lock()
                .retain(|subscriber| !dead.contains(&subscriber.id));
            debug!("pruned {} dead live subscribers", dead.len());
        }

        snapshot.len() - dead.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LiveUpdateSink for LiveUpdateBroadcaster {
    async fn broadcast(&self, event: LiveEvent) {
        let message = event.envelope(Utc::now()).to_string();
        let delivered = self.publish(&message);
        trace!("{} delivered to {delivered} subscribers", event.event_type());
    }
}
