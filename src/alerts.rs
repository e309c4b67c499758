use std::sync::Arc;

use tracing::{info, instrument};

use crate::live::{LiveEvent, LiveUpdateSink};
use crate::notify::{AlertContext, Notifier};

/// Announces committed alerts: notification fanout first, then the live
/// `alert` event
#[derive(Clone)]
pub struct AlertManager {
    notifier: Arc<Notifier>,
    sink: Arc<dyn LiveUpdateSink>,
}

impl AlertManager {
    pub fn new(notifier: Arc<Notifier>, sink: Arc<dyn LiveUpdateSink>) -> Self {
        Self { notifier, sink }
    }

    #[instrument(skip_all, fields(alert_id = context.alert.id))]
    pub async fn announce(&self, context: AlertContext) {
        info!("{} alert: {}", context.alert.severity, context.alert.title);

        self.notifier.dispatch(&context).await;
        self.sink.broadcast(LiveEvent::Alert(context.alert)).await;
    }

    /// Announce several alerts in the order they were opened
    pub async fn announce_all(&self, contexts: Vec<AlertContext>) {
        for context in contexts {
            self.announce(context).await;
        }
    }
}
