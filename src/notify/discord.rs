//! Discord webhook payloads

use serde::Serialize;

use super::{AlertContext, FOOTER, severity_color, severity_emoji};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

pub fn build_embed(context: &AlertContext) -> Embed {
    let AlertContext { alert, subject } = context;

    let mut description = alert.message.clone();
    for (label, name) in [
        ("Node", &subject.node),
        ("VM", &subject.vm),
        ("Service", &subject.service),
    ] {
        if let Some(name) = name {
            description.push_str(&format!("\n**{label}:** {name}"));
        }
    }

    Embed {
        title: Some(format!("{} {}", severity_emoji(alert.severity), alert.title)),
        description: Some(description),
        color: Some(severity_color(alert.severity)),
        fields: vec![
            EmbedField {
                name: "Alert Type".to_string(),
                value: alert.alert_type.to_string(),
                inline: true,
            },
            EmbedField {
                name: "Severity".to_string(),
                value: alert.severity.as_str().to_uppercase(),
                inline: true,
            },
        ],
        footer: Some(EmbedFooter {
            text: FOOTER.to_string(),
        }),
        timestamp: Some(alert.created_at.to_rfc3339()),
    }
}

pub fn build_message(context: &AlertContext) -> Message {
    Message {
        content: None,
        embeds: vec![build_embed(context)],
    }
}

pub async fn send(
    client: &reqwest::Client,
    url: &str,
    context: &AlertContext,
) -> anyhow::Result<()> {
    super::post_json(client, url, &build_message(context)).await
}
