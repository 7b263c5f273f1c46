//! Task list and detail endpoints
//!
//! GET /api/tasks?page=1&sort=job_id&order=desc&project=..&assignee=..&status=..&search=..
//! GET /api/tasks/:job_id

use annomirror_common::db::{DistinctColumn, SortOrder, TaskListFilter, TaskSort};
use annomirror_common::TaskRecord;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::pagination::PageWindow;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TaskListParams {
    pub page: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub project: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
}

/// Task Record plus derived fields
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub completion_percentage: u8,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        let completion_percentage = record.completion_percentage();
        Self {
            record,
            completion_percentage,
        }
    }
}

/// Values available for each list filter
#[derive(Debug, Serialize)]
pub struct FilterOptions {
    pub projects: Vec<String>,
    pub assignees: Vec<String>,
    pub statuses: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskView>,
    #[serde(flatten)]
    pub window: PageWindow,
    pub filters: FilterOptions,
}

/// Blank query values mean "no filter"
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListParams>,
) -> ApiResult<Json<TaskListResponse>> {
    let sort = match params.sort.as_deref() {
        None | Some("") => TaskSort::default(),
        Some(key) => TaskSort::parse(key)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown sort column: {}", key)))?,
    };
    let order = params
        .order
        .as_deref()
        .map(SortOrder::parse)
        .unwrap_or_default();

    let filter = TaskListFilter {
        project_name: non_empty(params.project),
        assignee: non_empty(params.assignee),
        status: non_empty(params.status),
        search: non_empty(params.search),
    };

    let total_results = state.tasks.count_filtered(&filter).await?;
    let window = PageWindow::locate(total_results, params.page);

    let tasks = state
        .tasks
        .list(&filter, sort, order, window.page_size, window.offset())
        .await?
        .into_iter()
        .map(TaskView::from)
        .collect();

    let filters = FilterOptions {
        projects: state.tasks.distinct_values(DistinctColumn::ProjectName).await?,
        assignees: state.tasks.distinct_values(DistinctColumn::Assignee).await?,
        statuses: state.tasks.distinct_values(DistinctColumn::Status).await?,
    };

    Ok(Json(TaskListResponse {
        tasks,
        window,
        filters,
    }))
}

/// GET /api/tasks/:job_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<TaskView>> {
    let record = state
        .tasks
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {}", job_id)))?;

    Ok(Json(TaskView::from(record)))
}
