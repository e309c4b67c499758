//! Threshold rule evaluation
//!
//! A metric value is checked against every active rule for its metric type
//! whose scope admits the subject. The first rule that is out of cooldown,
//! breaches its threshold and finds the `high_usage` key of the subject free
//! opens an alert; evaluation stops there.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, trace};

use crate::models::{
    Alert, AlertKey, AlertRule, Comparator, MetricType, NewAlert, SubjectNames,
};
use crate::storage::{StorageResult, StoreTx};

/// Tolerance of the `==` comparator
const EQUALITY_EPSILON: f64 = 0.01;

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Lt => value < threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => (value - threshold).abs() < EQUALITY_EPSILON,
        }
    }
}

/// One metric value to check, with the subject it was observed on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricEvaluation {
    pub metric_type: MetricType,
    pub value: f64,
    pub node_id: Option<i64>,
    pub vm_id: Option<i64>,
    pub service_id: Option<i64>,
    pub at: DateTime<Utc>,
}

impl MetricEvaluation {
    fn key(&self) -> AlertKey {
        AlertKey::high_usage(self.node_id, self.vm_id, self.service_id)
    }
}

/// Whether the scope of `rule` admits the evaluated subject; an unset scope
/// field is a wildcard
pub fn in_scope(rule: &AlertRule, evaluation: &MetricEvaluation) -> bool {
    fn admits(scope: Option<i64>, id: Option<i64>) -> bool {
        scope.is_none() || scope == id
    }

    admits(rule.node_id, evaluation.node_id)
        && admits(rule.vm_id, evaluation.vm_id)
        && admits(rule.service_id, evaluation.service_id)
}

/// A rule may fire again only once `now` is strictly past its cooldown
pub fn is_cooling_down(rule: &AlertRule, now: DateTime<Utc>) -> bool {
    rule.last_triggered
        .is_some_and(|last| now <= last + Duration::minutes(rule.cooldown_minutes))
}

fn unit_suffix(metric_type: MetricType) -> &'static str {
    match metric_type {
        MetricType::ResponseTime => "ms",
        _ => "%",
    }
}

fn alert_text(rule: &AlertRule, evaluation: &MetricEvaluation, subject: &SubjectNames) -> (String, String) {
    let metric = evaluation.metric_type.as_str().to_uppercase();
    let unit = unit_suffix(evaluation.metric_type);

    let title = format!("{} - {metric} threshold exceeded", rule.name);
    let mut message = format!(
        "{metric} is {:.2}{unit} (threshold: {} {}{unit})",
        evaluation.value, rule.comparator, rule.threshold
    );
    if let Some(node) = &subject.node {
        message.push_str(&format!(" on node {node}"));
    }
    if let Some(vm) = &subject.vm {
        message.push_str(&format!(" (VM: {vm})"));
    }
    if let Some(service) = &subject.service {
        message.push_str(&format!(" (Service: {service})"));
    }

    (title, message)
}

/// Evaluate one metric value inside the caller's unit of work.
///
/// Returns the alert that was opened, if any. The rule's `last_triggered` is
/// updated in the same transaction; notifying is left to the caller once the
/// transaction is committed.
#[instrument(skip(tx, subject), fields(metric = %evaluation.metric_type, value = evaluation.value))]
pub async fn evaluate(
    tx: &mut dyn StoreTx,
    evaluation: &MetricEvaluation,
    subject: &SubjectNames,
) -> StorageResult<Option<Alert>> {
    let rules = tx.alert_rules().await?;
    let candidates = rules.iter().filter(|rule| {
        rule.is_active && rule.metric_type == evaluation.metric_type && in_scope(rule, evaluation)
    });

    for rule in candidates {
        if is_cooling_down(rule, evaluation.at) {
            trace!("rule '{}' is cooling down", rule.name);
            continue;
        }

        if !rule.comparator.holds(evaluation.value, rule.threshold) {
            continue;
        }

        let key = evaluation.key();
        if tx.find_open_alert(&key).await?.is_some() {
            debug!("rule '{}' breached, but an alert is already open", rule.name);
            continue;
        }

        let (title, message) = alert_text(rule, evaluation, subject);
        let Some(alert) = tx
            .insert_alert(NewAlert {
                key,
                severity: rule.severity,
                title,
                message,
                created_at: evaluation.at,
            })
            .await?
        else {
            continue;
        };

        tx.mark_rule_triggered(rule.id, evaluation.at).await?;
        debug!("rule '{}' opened alert {}", rule.name, alert.id);
        return Ok(Some(alert));
    }

    Ok(None)
}
