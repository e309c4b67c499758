//! Best-effort delivery of alerts to email, generic webhooks and chat channels
//!
//! [`Notifier::dispatch`] never fails: every delivery is attempted once, with
//! its own timeout, and failures are logged and counted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EmailConfig;
use crate::models::{Alert, ChannelKind, NotificationChannel, Severity, SubjectNames, Webhook};
use crate::storage::{StorageResult, Store};

pub mod discord;
pub mod email;
pub mod slack;
pub mod webhook;

use email::EmailNotifier;

/// Deadline for a single outbound delivery
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Name shown in chat message footers
pub const FOOTER: &str = "Monitorix";

/// A freshly opened alert plus the names of what it is about
#[derive(Debug, Clone, PartialEq)]
pub struct AlertContext {
    pub alert: Alert,
    pub subject: SubjectNames,
}

/// Colour as `0xRRGGBB`
pub fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 0xdc3545,
        Severity::Warning => 0xffc107,
        Severity::Info => 0x17a2b8,
    }
}

pub fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::Warning => "⚠️",
        Severity::Info => "ℹ️",
    }
}

/// An empty allow-list admits everything
fn admits(allow_list: &[String], value: &str) -> bool {
    allow_list.is_empty() || allow_list.iter().any(|allowed| allowed == value)
}

impl Webhook {
    pub fn accepts(&self, alert: &Alert) -> bool {
        self.is_active && admits(&self.alert_types, alert.alert_type.as_str())
    }
}

impl NotificationChannel {
    pub fn accepts(&self, alert: &Alert) -> bool {
        self.is_active
            && admits(&self.alert_types, alert.alert_type.as_str())
            && admits(&self.severity_filter, alert.severity.as_str())
    }
}

/// Delivery counts of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, result: &anyhow::Result<()>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Notifier {
    client: reqwest::Client,
    email: Option<EmailNotifier>,
    store: Arc<dyn Store>,
}

impl Notifier {
    pub fn new(store: Arc<dyn Store>, email: Option<&EmailConfig>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .context("failed to build notification HTTP client")?;

        let email = match email {
            Some(config) => EmailNotifier::from_config(config)?,
            None => None,
        };

        Ok(Self {
            client,
            email,
            store,
        })
    }

    /// Deliver one alert to every admitting target
    #[instrument(skip_all, fields(alert_id = context.alert.id, alert_type = %context.alert.alert_type))]
    pub async fn dispatch(&self, context: &AlertContext) -> DispatchSummary {
        let (webhooks, channels) = match self.load_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!("failed to load notification targets: {e}");
                (Vec::new(), Vec::new())
            }
        };

        let (email, webhooks, channels) = tokio::join!(
            self.send_email(context),
            self.send_webhooks(context, &webhooks),
            self.send_channels(context, &channels),
        );

        let mut summary = DispatchSummary::default();
        for result in email.iter().chain(&webhooks).chain(&channels) {
            summary.record(result);
        }

        info!(
            "alert dispatched: {} delivered, {} failed",
            summary.delivered, summary.failed
        );
        summary
    }

    /// Read the targets in a short unit of work that is discarded right away
    async fn load_targets(&self) -> StorageResult<(Vec<Webhook>, Vec<NotificationChannel>)> {
        let mut tx = self.store.begin().await?;
        let webhooks = tx.webhooks().await?;
        let channels = tx.notification_channels().await?;
        Ok((webhooks, channels))
    }

    async fn send_email(&self, context: &AlertContext) -> Option<anyhow::Result<()>> {
        let Some(email) = &self.email else {
            debug!("email notifications disabled");
            return None;
        };

        let result = email.send(context).await;
        if let Err(e) = &result {
            error!("failed to send alert email: {e:#}");
        }
        Some(result)
    }

    async fn send_webhooks(
        &self,
        context: &AlertContext,
        webhooks: &[Webhook],
    ) -> Vec<anyhow::Result<()>> {
        let deliveries = webhooks
            .iter()
            .filter(|webhook| webhook.accepts(&context.alert))
            .map(|webhook| async move {
                let result = webhook::send(&self.client, webhook, context).await;
                match &result {
                    Ok(()) => debug!("webhook '{}' notified", webhook.name),
                    Err(e) => warn!("webhook '{}' failed: {e:#}", webhook.name),
                }
                result
            });

        join_all(deliveries).await
    }

    async fn send_channels(
        &self,
        context: &AlertContext,
        channels: &[NotificationChannel],
    ) -> Vec<anyhow::Result<()>> {
        let deliveries = channels
            .iter()
            .filter(|channel| channel.accepts(&context.alert))
            .map(|channel| async move {
                let result = match channel.kind {
                    ChannelKind::Slack => {
                        slack::send(&self.client, &channel.webhook_url, context).await
                    }
                    ChannelKind::Discord => {
                        discord::send(&self.client, &channel.webhook_url, context).await
                    }
                };
                match &result {
                    Ok(()) => debug!("{} channel '{}' notified", channel.kind, channel.name),
                    Err(e) => warn!("{} channel '{}' failed: {e:#}", channel.kind, channel.name),
                }
                result
            });

        join_all(deliveries).await
    }
}

/// POST a JSON body and treat any non-2xx answer as failure
async fn post_json<T: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> anyhow::Result<()> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    response
        .error_for_status()
        .with_context(|| format!("{url} rejected the notification"))?;
    Ok(())
}
