//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the scheduler's writes
//! - **Connection pooling**: Job actors and on-demand checks share one pool
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Every [`StoreTx`] wraps one `sqlx` transaction. Units of work pass through
//! a write gate one at a time, so a read-then-write sequence never fails on a
//! stale snapshot. Alert dedup is additionally enforced by a partial unique
//! index over the open-incident key.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{MetricQuery, NodePoll, Store, StoreTx};
use super::error::{StorageError, StorageResult};
use crate::models::{
    Alert, AlertKey, AlertRule, CheckKind, HealthCheckResult, MetricSample, MonitoredNode,
    MonitoredService, NewAlert, NewAlertRule, NewHealthCheck, NewMetricSample, NewNode,
    NewNotificationChannel, NewService, NewWebhook, NodeUsage, NotificationChannel,
    VirtualMachine, VmSnapshot, Webhook,
};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
    gate: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use monitorix::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./monitorix.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            gate: Arc::new(Mutex::new(())),
        })
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTx>> {
        let gate = self.gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        trace!("opened SQLite unit of work");
        Ok(Box::new(SqliteTx { tx, _gate: gate }))
    }

    fn describe(&self) -> String {
        format!("SQLite at {}", self.db_path)
    }
}

/// Unit of work over a [`SqliteStore`]
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
    /// Held until commit or drop
    _gate: OwnedMutexGuard<()>,
}

fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::InvalidRecord(format!("timestamp out of range: {millis}")))
}

fn opt_from_millis(millis: Option<i64>) -> StorageResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

fn unsigned(value: i64) -> u64 {
    value.max(0) as u64
}

/// Decode every row, skipping the ones that do not form a valid record
fn decode_all<T>(
    rows: Vec<SqliteRow>,
    kind: &str,
    decode: impl Fn(&SqliteRow) -> StorageResult<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping malformed {kind} row: {e}");
                None
            }
        })
        .collect()
}

const NODE_COLUMNS: &str = "id, name, url, username, token, verify_ssl, is_active, \
    maintenance_mode, status, last_check, cpu_usage, memory_used, memory_total, disk_used, \
    disk_total, uptime, created_at";

fn node_from_row(row: &SqliteRow) -> StorageResult<MonitoredNode> {
    let status: String = row.try_get("status")?;
    let usage = match row.try_get::<Option<f64>, _>("cpu_usage")? {
        Some(cpu_usage) => Some(NodeUsage {
            cpu_usage,
            memory_used: unsigned(row.try_get::<Option<i64>, _>("memory_used")?.unwrap_or(0)),
            memory_total: unsigned(row.try_get::<Option<i64>, _>("memory_total")?.unwrap_or(0)),
            disk_used: unsigned(row.try_get::<Option<i64>, _>("disk_used")?.unwrap_or(0)),
            disk_total: unsigned(row.try_get::<Option<i64>, _>("disk_total")?.unwrap_or(0)),
            uptime: unsigned(row.try_get::<Option<i64>, _>("uptime")?.unwrap_or(0)),
        }),
        None => None,
    };

    Ok(MonitoredNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        username: row.try_get("username")?,
        token: row.try_get("token")?,
        verify_ssl: row.try_get("verify_ssl")?,
        is_active: row.try_get("is_active")?,
        maintenance_mode: row.try_get("maintenance_mode")?,
        status: status.parse()?,
        last_check: opt_from_millis(row.try_get("last_check")?)?,
        usage,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

const VM_COLUMNS: &str = "id, node_id, vmid, name, kind, status, cpu_usage, memory_used, \
    memory_total, disk_used, disk_total, uptime, last_check, created_at";

fn vm_from_row(row: &SqliteRow) -> StorageResult<VirtualMachine> {
    let vmid: i64 = row.try_get("vmid")?;
    let kind: String = row.try_get("kind")?;

    Ok(VirtualMachine {
        id: row.try_get("id")?,
        node_id: row.try_get("node_id")?,
        vmid: u32::try_from(vmid)
            .map_err(|_| StorageError::InvalidRecord(format!("vmid out of range: {vmid}")))?,
        name: row.try_get("name")?,
        kind: kind.parse()?,
        status: row.try_get("status")?,
        cpu_usage: row.try_get("cpu_usage")?,
        memory_used: unsigned(row.try_get("memory_used")?),
        memory_total: unsigned(row.try_get("memory_total")?),
        disk_used: unsigned(row.try_get("disk_used")?),
        disk_total: unsigned(row.try_get("disk_total")?),
        uptime: unsigned(row.try_get("uptime")?),
        last_check: from_millis(row.try_get("last_check")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

const SERVICE_COLUMNS: &str = "id, name, vmid, check_json, timeout, check_interval, \
    is_active, maintenance_mode, created_at";

fn service_from_row(row: &SqliteRow) -> StorageResult<MonitoredService> {
    let id: i64 = row.try_get("id")?;
    let raw: String = row.try_get("check_json")?;
    let check: CheckKind = serde_json::from_str(&raw)
        .map_err(|e| StorageError::InvalidRecord(format!("service {id} check: {e}")))?;

    let vmid: Option<i64> = row.try_get("vmid")?;
    let vmid = vmid
        .map(u32::try_from)
        .transpose()
        .map_err(|_| StorageError::InvalidRecord(format!("service {id} vmid out of range")))?;

    Ok(MonitoredService {
        id,
        name: row.try_get("name")?,
        vmid,
        check,
        timeout: unsigned(row.try_get("timeout")?),
        check_interval: unsigned(row.try_get("check_interval")?),
        is_active: row.try_get("is_active")?,
        maintenance_mode: row.try_get("maintenance_mode")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

const HEALTH_CHECK_COLUMNS: &str =
    "id, service_id, status, response_time_ms, status_code, error_message, checked_at";

fn health_check_from_row(row: &SqliteRow) -> StorageResult<HealthCheckResult> {
    let status: String = row.try_get("status")?;
    let status_code: Option<i64> = row.try_get("status_code")?;

    Ok(HealthCheckResult {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        status: status.parse()?,
        response_time_ms: row.try_get("response_time_ms")?,
        status_code: status_code.and_then(|code| u16::try_from(code).ok()),
        error_message: row.try_get("error_message")?,
        checked_at: from_millis(row.try_get("checked_at")?)?,
    })
}

fn metric_from_row(row: &SqliteRow) -> StorageResult<MetricSample> {
    let metric_type: String = row.try_get("metric_type")?;

    Ok(MetricSample {
        id: row.try_get("id")?,
        node_id: row.try_get("node_id")?,
        vm_id: row.try_get("vm_id")?,
        metric_type: metric_type.parse()?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        recorded_at: from_millis(row.try_get("recorded_at")?)?,
    })
}

const RULE_COLUMNS: &str = "id, name, metric_type, operator, threshold, severity, node_id, \
    vm_id, service_id, cooldown_minutes, is_active, last_triggered";

fn rule_from_row(row: &SqliteRow) -> StorageResult<AlertRule> {
    let metric_type: String = row.try_get("metric_type")?;
    let operator: String = row.try_get("operator")?;
    let severity: String = row.try_get("severity")?;

    Ok(AlertRule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        metric_type: metric_type.parse()?,
        comparator: operator.parse()?,
        threshold: row.try_get("threshold")?,
        severity: severity.parse()?,
        node_id: row.try_get("node_id")?,
        vm_id: row.try_get("vm_id")?,
        service_id: row.try_get("service_id")?,
        cooldown_minutes: row.try_get("cooldown_minutes")?,
        is_active: row.try_get("is_active")?,
        last_triggered: opt_from_millis(row.try_get("last_triggered")?)?,
    })
}

const ALERT_COLUMNS: &str = "id, alert_type, severity, title, message, node_id, vm_id, \
    service_id, is_resolved, resolved_at, created_at";

fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
    let alert_type: String = row.try_get("alert_type")?;
    let severity: String = row.try_get("severity")?;

    Ok(Alert {
        id: row.try_get("id")?,
        alert_type: alert_type.parse()?,
        severity: severity.parse()?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        node_id: row.try_get("node_id")?,
        vm_id: row.try_get("vm_id")?,
        service_id: row.try_get("service_id")?,
        is_resolved: row.try_get("is_resolved")?,
        resolved_at: opt_from_millis(row.try_get("resolved_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn webhook_from_row(row: &SqliteRow) -> StorageResult<Webhook> {
    let headers: String = row.try_get("headers")?;
    let alert_types: String = row.try_get("alert_types")?;

    Ok(Webhook {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        headers: serde_json::from_str(&headers)?,
        alert_types: serde_json::from_str(&alert_types)?,
        is_active: row.try_get("is_active")?,
    })
}

fn channel_from_row(row: &SqliteRow) -> StorageResult<NotificationChannel> {
    let kind: String = row.try_get("kind")?;
    let alert_types: String = row.try_get("alert_types")?;
    let severity_filter: String = row.try_get("severity_filter")?;

    Ok(NotificationChannel {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: kind.parse()?,
        webhook_url: row.try_get("webhook_url")?,
        alert_types: serde_json::from_str(&alert_types)?,
        severity_filter: serde_json::from_str(&severity_filter)?,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn nodes(&mut self) -> StorageResult<Vec<MonitoredNode>> {
        let rows = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"))
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(decode_all(rows, "node", node_from_row))
    }

    async fn node(&mut self, id: i64) -> StorageResult<Option<MonitoredNode>> {
        sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(node_from_row)
            .transpose()
    }

    async fn insert_node(&mut self, node: NewNode) -> StorageResult<MonitoredNode> {
        let row = sqlx::query(&format!(
            "INSERT INTO nodes (name, url, username, token, verify_ssl, is_active, \
             maintenance_mode, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'unknown', ?) RETURNING {NODE_COLUMNS}"
        ))
        .bind(&node.name)
        .bind(&node.url)
        .bind(&node.username)
        .bind(&node.token)
        .bind(node.verify_ssl)
        .bind(node.is_active)
        .bind(node.maintenance_mode)
        .bind(to_millis(&Utc::now()))
        .fetch_one(&mut *self.tx)
        .await?;
        node_from_row(&row)
    }

    #[instrument(skip(self, poll), fields(status = %poll.status))]
    async fn record_node_poll(&mut self, node_id: i64, poll: NodePoll) -> StorageResult<()> {
        let result = match poll.usage {
            Some(usage) => {
                sqlx::query(
                    "UPDATE nodes SET status = ?, last_check = ?, cpu_usage = ?, \
                     memory_used = ?, memory_total = ?, disk_used = ?, disk_total = ?, \
                     uptime = ? WHERE id = ?",
                )
                .bind(poll.status.as_str())
                .bind(to_millis(&poll.last_check))
                .bind(usage.cpu_usage)
                .bind(usage.memory_used as i64)
                .bind(usage.memory_total as i64)
                .bind(usage.disk_used as i64)
                .bind(usage.disk_total as i64)
                .bind(usage.uptime as i64)
                .bind(node_id)
                .execute(&mut *self.tx)
                .await?
            }
            None => {
                sqlx::query("UPDATE nodes SET status = ?, last_check = ? WHERE id = ?")
                    .bind(poll.status.as_str())
                    .bind(to_millis(&poll.last_check))
                    .bind(node_id)
                    .execute(&mut *self.tx)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("node {node_id}")));
        }
        Ok(())
    }

    async fn vms(&mut self, node_id: i64) -> StorageResult<Vec<VirtualMachine>> {
        let rows = sqlx::query(&format!(
            "SELECT {VM_COLUMNS} FROM vms WHERE node_id = ? ORDER BY vmid"
        ))
        .bind(node_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "vm", vm_from_row))
    }

    async fn vm_by_vmid(&mut self, vmid: u32) -> StorageResult<Option<VirtualMachine>> {
        sqlx::query(&format!(
            "SELECT {VM_COLUMNS} FROM vms WHERE vmid = ? ORDER BY id LIMIT 1"
        ))
        .bind(i64::from(vmid))
        .fetch_optional(&mut *self.tx)
        .await?
        .as_ref()
        .map(vm_from_row)
        .transpose()
    }

    async fn upsert_vm(
        &mut self,
        node_id: i64,
        snapshot: &VmSnapshot,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<VirtualMachine> {
        let seen = to_millis(&seen_at);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO vms (
                node_id, vmid, name, kind, status, cpu_usage, memory_used, memory_total,
                disk_used, disk_total, uptime, last_check, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (node_id, vmid) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                status = excluded.status,
                cpu_usage = excluded.cpu_usage,
                memory_used = excluded.memory_used,
                memory_total = excluded.memory_total,
                disk_used = excluded.disk_used,
                disk_total = excluded.disk_total,
                uptime = excluded.uptime,
                last_check = excluded.last_check
            RETURNING {VM_COLUMNS}
            "#
        ))
        .bind(node_id)
        .bind(i64::from(snapshot.vmid))
        .bind(snapshot.display_name())
        .bind(snapshot.kind.as_str())
        .bind(&snapshot.status)
        .bind(snapshot.cpu_usage)
        .bind(snapshot.memory_used as i64)
        .bind(snapshot.memory_total as i64)
        .bind(snapshot.disk_used as i64)
        .bind(snapshot.disk_total as i64)
        .bind(snapshot.uptime as i64)
        .bind(seen)
        .bind(seen)
        .fetch_one(&mut *self.tx)
        .await?;
        vm_from_row(&row)
    }

    async fn services(&mut self) -> StorageResult<Vec<MonitoredService>> {
        let rows = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services ORDER BY id"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "service", service_from_row))
    }

    async fn service(&mut self, id: i64) -> StorageResult<Option<MonitoredService>> {
        sqlx::query(&format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(service_from_row)
            .transpose()
    }

    async fn insert_service(&mut self, service: NewService) -> StorageResult<MonitoredService> {
        let check = serde_json::to_string(&service.check)?;
        let row = sqlx::query(&format!(
            "INSERT INTO services (name, vmid, check_type, check_json, timeout, \
             check_interval, is_active, maintenance_mode, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {SERVICE_COLUMNS}"
        ))
        .bind(&service.name)
        .bind(service.vmid.map(i64::from))
        .bind(service.check.type_name())
        .bind(check)
        .bind(service.timeout as i64)
        .bind(service.check_interval as i64)
        .bind(service.is_active)
        .bind(service.maintenance_mode)
        .bind(to_millis(&Utc::now()))
        .fetch_one(&mut *self.tx)
        .await?;
        service_from_row(&row)
    }

    async fn insert_health_check(
        &mut self,
        check: NewHealthCheck,
    ) -> StorageResult<HealthCheckResult> {
        let row = sqlx::query(&format!(
            "INSERT INTO health_checks (service_id, status, response_time_ms, status_code, \
             error_message, checked_at) VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {HEALTH_CHECK_COLUMNS}"
        ))
        .bind(check.service_id)
        .bind(check.outcome.status.as_str())
        .bind(check.outcome.response_time_ms)
        .bind(check.outcome.status_code.map(i64::from))
        .bind(&check.outcome.error_message)
        .bind(to_millis(&check.checked_at))
        .fetch_one(&mut *self.tx)
        .await?;
        health_check_from_row(&row)
    }

    async fn health_checks_since(
        &mut self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<HealthCheckResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {HEALTH_CHECK_COLUMNS} FROM health_checks \
             WHERE service_id = ? AND checked_at >= ? ORDER BY checked_at"
        ))
        .bind(service_id)
        .bind(to_millis(&since))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "health check", health_check_from_row))
    }

    async fn prune_health_checks(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM health_checks WHERE checked_at < ?")
            .bind(to_millis(&before))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn append_metrics(&mut self, samples: &[NewMetricSample]) -> StorageResult<()> {
        for sample in samples {
            sqlx::query(
                "INSERT INTO metrics (node_id, vm_id, metric_type, value, unit, recorded_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(sample.node_id)
            .bind(sample.vm_id)
            .bind(sample.metric_type.as_str())
            .bind(sample.value)
            .bind(&sample.unit)
            .bind(to_millis(&sample.recorded_at))
            .execute(&mut *self.tx)
            .await?;
        }
        trace!("appended {} metric samples", samples.len());
        Ok(())
    }

    async fn metrics(&mut self, query: MetricQuery) -> StorageResult<Vec<MetricSample>> {
        let rows = sqlx::query(
            "SELECT id, node_id, vm_id, metric_type, value, unit, recorded_at FROM metrics \
             WHERE node_id IS ? AND vm_id IS ? AND metric_type = ? AND recorded_at >= ? \
             ORDER BY recorded_at",
        )
        .bind(query.node_id)
        .bind(query.vm_id)
        .bind(query.metric_type.as_str())
        .bind(to_millis(&query.since))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "metric", metric_from_row))
    }

    async fn prune_metrics(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM metrics WHERE recorded_at < ?")
            .bind(to_millis(&before))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn alert_rules(&mut self) -> StorageResult<Vec<AlertRule>> {
        let rows = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM alert_rules ORDER BY id"))
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(decode_all(rows, "alert rule", rule_from_row))
    }

    async fn insert_alert_rule(&mut self, rule: NewAlertRule) -> StorageResult<AlertRule> {
        let row = sqlx::query(&format!(
            "INSERT INTO alert_rules (name, metric_type, operator, threshold, severity, \
             node_id, vm_id, service_id, cooldown_minutes, is_active, last_triggered) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {RULE_COLUMNS}"
        ))
        .bind(&rule.name)
        .bind(rule.metric_type.as_str())
        .bind(rule.comparator.as_str())
        .bind(rule.threshold)
        .bind(rule.severity.as_str())
        .bind(rule.node_id)
        .bind(rule.vm_id)
        .bind(rule.service_id)
        .bind(rule.cooldown_minutes)
        .bind(rule.is_active)
        .bind(rule.last_triggered.as_ref().map(to_millis))
        .fetch_one(&mut *self.tx)
        .await?;
        rule_from_row(&row)
    }

    async fn mark_rule_triggered(
        &mut self,
        rule_id: i64,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE alert_rules SET last_triggered = ? WHERE id = ?")
            .bind(to_millis(&at))
            .bind(rule_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("alert rule {rule_id}")));
        }
        Ok(())
    }

    async fn alerts(&mut self) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts ORDER BY id DESC"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "alert", alert_from_row))
    }

    async fn find_open_alert(&mut self, key: &AlertKey) -> StorageResult<Option<Alert>> {
        sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE is_resolved = 0 AND alert_type = ? \
             AND node_id IS ? AND vm_id IS ? AND service_id IS ? LIMIT 1"
        ))
        .bind(key.alert_type.as_str())
        .bind(key.node_id)
        .bind(key.vm_id)
        .bind(key.service_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .as_ref()
        .map(alert_from_row)
        .transpose()
    }

    async fn open_alerts_for_service(&mut self, service_id: i64) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE is_resolved = 0 AND service_id = ? \
             ORDER BY id"
        ))
        .bind(service_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "alert", alert_from_row))
    }

    #[instrument(skip(self, alert), fields(alert_type = %alert.key.alert_type))]
    async fn insert_alert(&mut self, alert: NewAlert) -> StorageResult<Option<Alert>> {
        // the partial unique index turns a duplicate open key into a no-op
        let row = sqlx::query(&format!(
            "INSERT OR IGNORE INTO alerts (alert_type, severity, title, message, node_id, \
             vm_id, service_id, is_resolved, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?) RETURNING {ALERT_COLUMNS}"
        ))
        .bind(alert.key.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.key.node_id)
        .bind(alert.key.vm_id)
        .bind(alert.key.service_id)
        .bind(to_millis(&alert.created_at))
        .fetch_optional(&mut *self.tx)
        .await?;

        if row.is_none() {
            debug!("open alert with the same key already exists");
        }
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn resolve_alerts(&mut self, ids: &[i64], at: DateTime<Utc>) -> StorageResult<u64> {
        let mut resolved = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE alerts SET is_resolved = 1, resolved_at = ? \
                 WHERE id = ? AND is_resolved = 0",
            )
            .bind(to_millis(&at))
            .bind(*id)
            .execute(&mut *self.tx)
            .await?;
            resolved += result.rows_affected();
        }
        Ok(resolved)
    }

    async fn webhooks(&mut self) -> StorageResult<Vec<Webhook>> {
        let rows = sqlx::query(
            "SELECT id, name, url, method, headers, alert_types, is_active FROM webhooks \
             ORDER BY id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "webhook", webhook_from_row))
    }

    async fn insert_webhook(&mut self, webhook: NewWebhook) -> StorageResult<Webhook> {
        let row = sqlx::query(
            "INSERT INTO webhooks (name, url, method, headers, alert_types, is_active) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING id, name, url, method, headers, alert_types, is_active",
        )
        .bind(&webhook.name)
        .bind(&webhook.url)
        .bind(&webhook.method)
        .bind(serde_json::to_string(&webhook.headers)?)
        .bind(serde_json::to_string(&webhook.alert_types)?)
        .bind(webhook.is_active)
        .fetch_one(&mut *self.tx)
        .await?;
        webhook_from_row(&row)
    }

    async fn notification_channels(&mut self) -> StorageResult<Vec<NotificationChannel>> {
        let rows = sqlx::query(
            "SELECT id, name, kind, webhook_url, alert_types, severity_filter, is_active \
             FROM notification_channels ORDER BY id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(decode_all(rows, "notification channel", channel_from_row))
    }

    async fn insert_notification_channel(
        &mut self,
        channel: NewNotificationChannel,
    ) -> StorageResult<NotificationChannel> {
        let row = sqlx::query(
            "INSERT INTO notification_channels (name, kind, webhook_url, alert_types, \
             severity_filter, is_active) VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING id, name, kind, webhook_url, alert_types, severity_filter, is_active",
        )
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .bind(&channel.webhook_url)
        .bind(serde_json::to_string(&channel.alert_types)?)
        .bind(serde_json::to_string(&channel.severity_filter)?)
        .bind(channel.is_active)
        .fetch_one(&mut *self.tx)
        .await?;
        channel_from_row(&row)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let SqliteTx { tx, _gate } = *self;
        tx.commit().await?;
        Ok(())
    }
}
