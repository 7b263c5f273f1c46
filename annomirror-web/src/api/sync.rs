//! POST /api/sync - run a pull-side sync and return its summary

use annomirror_common::JobFilter;
use annomirror_sync::SyncSummary;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub assignee: Option<String>,
    pub status: Option<String>,
    pub force: bool,
}

/// Outage → 502 carrying the partial summary
pub async fn trigger_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncSummary>> {
    let filter = JobFilter {
        project_id: request.project_id,
        task_id: request.task_id,
        assignee: request.assignee,
        status: request.status,
    };
    info!(filter = %filter, force = request.force, "Sync requested over HTTP");

    let summary = state.sync.run(&filter, request.force).await?;
    Ok(Json(summary))
}
