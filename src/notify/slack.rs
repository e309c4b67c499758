//! Slack incoming-webhook payloads

use serde::Serialize;

use super::{AlertContext, FOOTER, severity_color, severity_emoji};

#[derive(Debug, Clone, Serialize)]
pub struct SlackMessage {
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    /// `#rrggbb`
    pub color: String,
    pub title: String,
    pub text: String,
    pub fields: Vec<AttachmentField>,
    pub footer: String,
    /// Unix seconds
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl AttachmentField {
    fn short(title: &str, value: impl ToString) -> Self {
        Self {
            title: title.to_string(),
            value: value.to_string(),
            short: true,
        }
    }
}

pub fn build_message(context: &AlertContext) -> SlackMessage {
    let AlertContext { alert, subject } = context;

    let mut fields = Vec::new();
    if let Some(node) = &subject.node {
        fields.push(AttachmentField::short("Node", node));
    }
    if let Some(vm) = &subject.vm {
        fields.push(AttachmentField::short("VM", vm));
    }
    if let Some(service) = &subject.service {
        fields.push(AttachmentField::short("Service", service));
    }
    fields.push(AttachmentField::short("Alert Type", alert.alert_type));

    SlackMessage {
        attachments: vec![Attachment {
            color: format!("#{:06x}", severity_color(alert.severity)),
            title: format!("{} {}", severity_emoji(alert.severity), alert.title),
            text: alert.message.clone(),
            fields,
            footer: FOOTER.to_string(),
            ts: alert.created_at.timestamp(),
        }],
    }
}

pub async fn send(
    client: &reqwest::Client,
    url: &str,
    context: &AlertContext,
) -> anyhow::Result<()> {
    super::post_json(client, url, &build_message(context)).await
}
