//! On-demand service checks and uptime

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ServiceCheckResponse, UptimeResponse},
};
use crate::uptime::{format_downtime, format_uptime};

const DEFAULT_UPTIME_HOURS: u32 = 24;

/// One year
const MAX_UPTIME_HOURS: u32 = 24 * 365;

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    hours: Option<u32>,
}

/// POST /api/v1/services/:id/check
pub async fn check_service(
    State(state): State<ApiState>,
    Path(service_id): Path<i64>,
) -> ApiResult<Json<ServiceCheckResponse>> {
    let check = state.scheduler.check_service(service_id).await?;
    Ok(Json(ServiceCheckResponse::new(service_id, check)))
}

/// GET /api/v1/services/:id/uptime?hours=N
pub async fn get_uptime(
    State(state): State<ApiState>,
    Path(service_id): Path<i64>,
    Query(query): Query<UptimeQuery>,
) -> ApiResult<Json<UptimeResponse>> {
    let hours = query.hours.unwrap_or(DEFAULT_UPTIME_HOURS);
    if hours == 0 || hours > MAX_UPTIME_HOURS {
        return Err(ApiError::InvalidRequest(format!(
            "hours must be between 1 and {MAX_UPTIME_HOURS}"
        )));
    }

    let monitor = state.scheduler.monitor();
    if monitor.service(service_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("service {service_id} not found")));
    }

    let uptime = monitor.service_uptime(service_id, hours).await?;
    Ok(Json(UptimeResponse {
        uptime_formatted: format_uptime(uptime.uptime_percent),
        downtime_formatted: format_downtime(uptime.downtime_minutes),
        uptime,
    }))
}
