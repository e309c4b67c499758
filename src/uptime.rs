//! Service availability derived from stored health checks
//!
//! Uptime over a window is the share of `up` results among all results in
//! that window. Anything else (`warning` included) counts as not up, and the
//! downtime is that share applied to the window length.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{CheckStatus, HealthCheckResult};
use crate::storage::{StorageResult, StoreTx};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceUptime {
    pub service_id: i64,
    pub period_hours: u32,
    pub total_checks: usize,
    pub up_checks: usize,
    pub down_checks: usize,
    pub uptime_percent: f64,
    pub downtime_minutes: f64,
    /// Mean over the checks that measured a response time
    pub avg_response_time_ms: Option<f64>,
}

impl ServiceUptime {
    /// Summarise the checks of one window
    pub fn from_checks(service_id: i64, period_hours: u32, checks: &[HealthCheckResult]) -> Self {
        let total_checks = checks.len();
        let up_checks = checks
            .iter()
            .filter(|check| check.status == CheckStatus::Up)
            .count();
        let down_checks = total_checks - up_checks;

        let (uptime_percent, downtime_minutes) = if total_checks == 0 {
            (0.0, 0.0)
        } else {
            let total = total_checks as f64;
            (
                up_checks as f64 / total * 100.0,
                down_checks as f64 / total * f64::from(period_hours) * 60.0,
            )
        };

        let timings: Vec<f64> = checks.iter().filter_map(|c| c.response_time_ms).collect();
        let avg_response_time_ms =
            (!timings.is_empty()).then(|| timings.iter().sum::<f64>() / timings.len() as f64);

        Self {
            service_id,
            period_hours,
            total_checks,
            up_checks,
            down_checks,
            uptime_percent,
            downtime_minutes,
            avg_response_time_ms,
        }
    }
}

pub async fn service_uptime(
    tx: &mut dyn StoreTx,
    service_id: i64,
    period_hours: u32,
    now: DateTime<Utc>,
) -> StorageResult<ServiceUptime> {
    let since = now - Duration::hours(period_hours.into());
    let checks = tx.health_checks_since(service_id, since).await?;
    Ok(ServiceUptime::from_checks(service_id, period_hours, &checks))
}

pub fn format_uptime(uptime_percent: f64) -> String {
    if uptime_percent >= 99.9 {
        "99.9%".to_string()
    } else if uptime_percent >= 99.0 {
        format!("{uptime_percent:.2}%")
    } else {
        format!("{uptime_percent:.1}%")
    }
}

pub fn format_downtime(downtime_minutes: f64) -> String {
    if downtime_minutes < 1.0 {
        format!("{}s", (downtime_minutes * 60.0) as u64)
    } else if downtime_minutes < 60.0 {
        format!("{}m", downtime_minutes as u64)
    } else {
        let total = downtime_minutes as u64;
        format!("{}h {}m", total / 60, total % 60)
    }
}
