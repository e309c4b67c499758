//! Creates the records listed in the configuration file
//!
//! Records are matched by name: anything already stored under the same name
//! is left alone, so restarting the hub with the same file is a no-op.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::config::Config;
use crate::storage::{StorageResult, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub nodes: usize,
    pub services: usize,
    pub alert_rules: usize,
    pub webhooks: usize,
    pub notification_channels: usize,
}

/// Names not seen yet; also skips duplicates within the file itself
fn fresh<'a, T>(
    items: &'a Option<Vec<T>>,
    mut existing: HashSet<String>,
    name: impl Fn(&T) -> &str,
) -> Vec<&'a T> {
    items
        .iter()
        .flatten()
        .filter(|item| existing.insert(name(item).to_string()))
        .collect()
}

pub async fn seed(store: &dyn Store, config: &Config) -> StorageResult<SeedReport> {
    let mut report = SeedReport::default();
    let mut tx = store.begin().await?;

    let known = tx.nodes().await?.into_iter().map(|n| n.name).collect();
    for node in fresh(&config.nodes, known, |n| n.name.as_str()) {
        debug!("adding node {}", node.name);
        tx.insert_node(node.clone()).await?;
        report.nodes += 1;
    }

    let known = tx.services().await?.into_iter().map(|s| s.name).collect();
    for service in fresh(&config.services, known, |s| s.name.as_str()) {
        debug!("adding service {}", service.name);
        tx.insert_service(service.clone()).await?;
        report.services += 1;
    }

    let known = tx.alert_rules().await?.into_iter().map(|r| r.name).collect();
    for rule in fresh(&config.alert_rules, known, |r| r.name.as_str()) {
        debug!("adding alert rule {}", rule.name);
        tx.insert_alert_rule(rule.clone()).await?;
        report.alert_rules += 1;
    }

    let known = tx.webhooks().await?.into_iter().map(|w| w.name).collect();
    for webhook in fresh(&config.webhooks, known, |w| w.name.as_str()) {
        debug!("adding webhook {}", webhook.name);
        tx.insert_webhook(webhook.clone()).await?;
        report.webhooks += 1;
    }

    let known = tx
        .notification_channels()
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    for channel in fresh(&config.notification_channels, known, |c| c.name.as_str()) {
        debug!("adding notification channel {}", channel.name);
        tx.insert_notification_channel(channel.clone()).await?;
        report.notification_channels += 1;
    }

    tx.commit().await?;

    info!(
        "seeded {} nodes, {} services, {} rules, {} webhooks, {} channels",
        report.nodes,
        report.services,
        report.alert_rules,
        report.webhooks,
        report.notification_channels
    );
    Ok(report)
}
