//! Generic HTTP callbacks

use anyhow::Context;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;

use super::AlertContext;
use crate::models::{AlertType, Severity, Webhook};

/// Body sent to every generic webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    pub alert_id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: &'a str,
    pub message: &'a str,
    pub timestamp: String,
    pub node_name: Option<&'a str>,
    pub vm_name: Option<&'a str>,
    pub service_name: Option<&'a str>,
}

impl<'a> WebhookPayload<'a> {
    pub fn new(context: &'a AlertContext) -> Self {
        let AlertContext { alert, subject } = context;
        Self {
            alert_id: alert.id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: &alert.title,
            message: &alert.message,
            timestamp: alert.created_at.to_rfc3339(),
            node_name: subject.node.as_deref(),
            vm_name: subject.vm.as_deref(),
            service_name: subject.service.as_deref(),
        }
    }
}

/// Send the payload with the webhook's method and headers; `Content-Type`
/// defaults to JSON unless the configured headers set it
pub async fn send(
    client: &reqwest::Client,
    webhook: &Webhook,
    context: &AlertContext,
) -> anyhow::Result<()> {
    let method = Method::from_bytes(webhook.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method '{}'", webhook.method))?;

    let mut request = client.request(method, &webhook.url);
    for (name, value) in &webhook.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name '{name}'"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header '{name}'"))?;
        request = request.header(name, value);
    }

    let response = request
        .json(&WebhookPayload::new(context))
        .send()
        .await
        .with_context(|| format!("request to {} failed", webhook.url))?;

    response
        .error_for_status()
        .with_context(|| format!("{} rejected the notification", webhook.url))?;
    Ok(())
}
