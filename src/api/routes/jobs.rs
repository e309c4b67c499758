//! Whole-job runs

use axum::{
    Json,
    extract::{Path, State},
};

use crate::actors::messages::JobReport;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};

/// POST /api/v1/jobs/:job/run
///
/// `job` is one of `nodes`, `services` or `retention`; answers once the run
/// finished.
pub async fn run_job(
    State(state): State<ApiState>,
    Path(job): Path<String>,
) -> ApiResult<Json<JobReport>> {
    let scheduler = &state.scheduler;
    let report = match job.as_str() {
        "nodes" => scheduler.run_node_job().await?,
        "services" => scheduler.run_service_job().await?,
        "retention" => scheduler.run_retention_job().await?,
        other => return Err(ApiError::NotFound(format!("job {other} not found"))),
    };
    Ok(Json(report))
}
