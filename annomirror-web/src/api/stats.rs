//! GET /api/stats - annotation totals and webhook processing counts

use std::collections::BTreeMap;

use annomirror_common::db::{GroupTotal, TotalsGroup, TotalsSummary};
use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub totals: TotalsSummary,
    pub by_status: Vec<GroupTotal>,
    pub by_project: Vec<GroupTotal>,
    pub by_assignee: Vec<GroupTotal>,
    /// Audit entry count per processing state
    pub webhooks: BTreeMap<String, i64>,
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let webhooks = state
        .audit
        .count_by_state()
        .await?
        .into_iter()
        .map(|(processing_state, count)| (processing_state.to_string(), count))
        .collect();

    Ok(Json(StatsResponse {
        totals: state.tasks.annotation_totals().await?,
        by_status: state.tasks.totals_by(TotalsGroup::Status).await?,
        by_project: state.tasks.totals_by(TotalsGroup::Project).await?,
        by_assignee: state.tasks.totals_by(TotalsGroup::Assignee).await?,
        webhooks,
    }))
}
