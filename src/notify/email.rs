//! SMTP delivery of alert mails

use std::time::Duration;

use anyhow::Context;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use super::{AlertContext, DELIVERY_TIMEOUT};
use crate::config::EmailConfig;

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Build the notifier, or `None` when email is disabled or the SMTP
    /// settings are incomplete. The password may come from the environment.
    pub fn from_config(config: &EmailConfig) -> anyhow::Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let password = crate::util::get_smtp_password().or_else(|| config.smtp_password.clone());
        let (Some(host), Some(user), Some(password), Some(from), Some(to)) = (
            config.smtp_host.as_deref(),
            config.smtp_user.as_deref(),
            password,
            config.from.as_deref(),
            config.to.as_deref(),
        ) else {
            info!("email notifications enabled, but SMTP settings are incomplete; skipping email");
            return Ok(None);
        };

        let builder = match config.smtp_port {
            587 => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .with_context(|| format!("invalid SMTP relay '{host}'"))?,
            465 => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .with_context(|| format!("invalid SMTP relay '{host}'"))?,
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(user.to_string(), password))
            .timeout(Some(DELIVERY_TIMEOUT))
            .build();

        debug!("alert mails go to {to} via {host}:{}", config.smtp_port);

        Ok(Some(Self {
            transport,
            from: from.parse().context("invalid email sender")?,
            to: to.parse().context("invalid email recipient")?,
        }))
    }

    pub async fn send(&self, context: &AlertContext) -> anyhow::Result<()> {
        let alert = &context.alert;
        let subject = format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title);

        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                plain_body(context),
                html_body(context),
            ))
            .context("failed to build alert mail")?;

        tokio::time::timeout(DELIVERY_TIMEOUT + Duration::from_secs(1), self.transport.send(message))
            .await
            .context("SMTP delivery timed out")?
            .context("SMTP delivery failed")?;

        debug!("alert mail sent to {}", self.to);
        Ok(())
    }
}

/// `(label, value)` lines shared by both mail bodies
fn detail_lines(context: &AlertContext) -> Vec<(&'static str, String)> {
    let AlertContext { alert, subject } = context;

    let mut lines = vec![
        ("Alert Type", alert.alert_type.to_string()),
        ("Severity", alert.severity.as_str().to_uppercase()),
        ("Title", alert.title.clone()),
        ("Message", alert.message.clone()),
    ];
    for (label, name) in [
        ("Node", &subject.node),
        ("VM", &subject.vm),
        ("Service", &subject.service),
    ] {
        if let Some(name) = name {
            lines.push((label, name.clone()));
        }
    }
    lines.push(("Time", alert.created_at.to_rfc3339()));
    lines
}

pub fn plain_body(context: &AlertContext) -> String {
    detail_lines(context)
        .into_iter()
        .map(|(label, value)| format!("{label}: {value}\n"))
        .collect()
}

pub fn html_body(context: &AlertContext) -> String {
    let rows: String = detail_lines(context)
        .into_iter()
        .map(|(label, value)| {
            format!(
                "<tr><th align=\"left\">{label}</th><td>{}</td></tr>",
                escape_html(&value)
            )
        })
        .collect();

    format!(
        "<html><body><h2>{}</h2><table>{rows}</table></body></html>",
        escape_html(&context.alert.title)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
