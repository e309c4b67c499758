//! On-demand node polling

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{NodeCheckResponse, VmSyncResponse},
};

/// POST /api/v1/nodes/:id/check
pub async fn check_node(
    State(state): State<ApiState>,
    Path(node_id): Path<i64>,
) -> ApiResult<Json<NodeCheckResponse>> {
    let check = state.scheduler.check_node(node_id).await?;
    Ok(Json(NodeCheckResponse::new(node_id, check)))
}

/// POST /api/v1/nodes/:id/sync
pub async fn sync_vms(
    State(state): State<ApiState>,
    Path(node_id): Path<i64>,
) -> ApiResult<Json<VmSyncResponse>> {
    let sync = state.scheduler.sync_vms(node_id).await?;
    Ok(Json(VmSyncResponse::new(node_id, sync)))
}
