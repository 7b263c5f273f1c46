//! GET /api/webhook-logs?page=1&state=error&event_type=update:job

use annomirror_common::db::AuditListFilter;
use annomirror_common::{AuditEntry, EventType, ProcessingState};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::pagination::PageWindow;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AuditListParams {
    pub page: Option<i64>,
    pub state: Option<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub entries: Vec<AuditEntry>,
    #[serde(flatten)]
    pub window: PageWindow,
}

fn parse_filter(params: &AuditListParams) -> Result<AuditListFilter, ApiError> {
    let state = match params.state.as_deref() {
        None | Some("") => None,
        Some(value) => Some(ProcessingState::parse(value).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown processing state: {}", value))
        })?),
    };

    let event_type = match params.event_type.as_deref() {
        None | Some("") => None,
        Some(value) => match EventType::from_event_name(value) {
            EventType::Unknown if value != EventType::Unknown.as_str() => {
                return Err(ApiError::BadRequest(format!("Unknown event type: {}", value)))
            }
            event_type => Some(event_type),
        },
    };

    Ok(AuditListFilter { state, event_type })
}

/// GET /api/webhook-logs (newest first)
pub async fn list_webhook_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditListParams>,
) -> ApiResult<Json<AuditListResponse>> {
    let filter = parse_filter(&params)?;

    let total_results = state.audit.count(&filter).await?;
    let window = PageWindow::locate(total_results, params.page);
    let entries = state
        .audit
        .list(&filter, window.page_size, window.offset())
        .await?;

    Ok(Json(AuditListResponse { entries, window }))
}
