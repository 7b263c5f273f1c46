//! Task Mirror Store
//!
//! One row per remote job, keyed by `job_id`. Every write is a single
//! statement, so each apply is atomic on its own and concurrent writers to
//! the same job are serialized by SQLite (last writer wins).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use crate::models::{JobFields, NormalizedJob, TaskRecord};
use crate::time::{parse_db_string, to_db_string};
use crate::{Error, Result};

const TASK_COLUMNS: &str = "job_id, task_id, task_name, project_id, project_name, assignee, \
     status, stage, state, manual_annotation_count, interpolated_annotation_count, \
     total_annotation_count, remote_url, raw_payload, last_synced_at, created_at, updated_at";

/// Columns the list view may sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSort {
    #[default]
    JobId,
    TaskId,
    TaskName,
    ProjectName,
    TotalAnnotations,
    LastSyncedAt,
}

impl TaskSort {
    /// Parse a user-supplied sort key; unknown keys are rejected
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "job_id" => Some(TaskSort::JobId),
            "task_id" => Some(TaskSort::TaskId),
            "task_name" => Some(TaskSort::TaskName),
            "project_name" => Some(TaskSort::ProjectName),
            "total_annotations" | "total_annotation_count" => Some(TaskSort::TotalAnnotations),
            "last_synced_at" => Some(TaskSort::LastSyncedAt),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            TaskSort::JobId => "job_id",
            TaskSort::TaskId => "task_id",
            TaskSort::TaskName => "task_name",
            TaskSort::ProjectName => "project_name",
            TaskSort::TotalAnnotations => "total_annotation_count",
            TaskSort::LastSyncedAt => "last_synced_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters for the read-only list view
#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub project_name: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<String>,
    /// Case-insensitive substring match on task or project name
    pub search: Option<String>,
}

/// Columns offered as filter dropdown values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctColumn {
    ProjectName,
    Assignee,
    Status,
}

impl DistinctColumn {
    fn column(&self) -> &'static str {
        match self {
            DistinctColumn::ProjectName => "project_name",
            DistinctColumn::Assignee => "assignee",
            DistinctColumn::Status => "status",
        }
    }
}

/// Grouping for annotation totals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalsGroup {
    Status,
    Project,
    Assignee,
}

impl TotalsGroup {
    fn column(&self) -> &'static str {
        match self {
            TotalsGroup::Status => "status",
            TotalsGroup::Project => "project_name",
            TotalsGroup::Assignee => "assignee",
        }
    }
}

/// Overall annotation totals across the mirror
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TotalsSummary {
    pub task_count: i64,
    pub total_annotations: i64,
    pub average_per_task: f64,
}

/// Annotation totals for one group value (`None` = not set on the task)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupTotal {
    pub key: Option<String>,
    pub total_annotations: i64,
    pub task_count: i64,
}

/// Handle to the tasks table
#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load one task by remote job id
    pub async fn get(&self, job_id: i64) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {} FROM tasks WHERE job_id = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    pub async fn exists(&self, job_id: i64) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Every mirrored `job_id`
    pub async fn mirrored_job_ids(&self) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT job_id FROM tasks")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Insert a job unless its `job_id` is already mirrored
    ///
    /// Returns `false` (and writes nothing) when a row already exists, including
    /// one inserted concurrently by another writer.
    pub async fn insert_if_absent(&self, job: &NormalizedJob) -> Result<bool> {
        let now = to_db_string(&crate::time::now());
        let sql = format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(job_id) DO NOTHING",
            TASK_COLUMNS
        );
        let result = bind_job(sqlx::query(&sql), job, &now)?
            .execute(&self.pool)
            .await?;

        let inserted = result.rows_affected() == 1;
        debug!(job_id = job.job_id, inserted, "insert_if_absent");
        Ok(inserted)
    }

    /// Insert or overwrite every mutable field of a job
    ///
    /// `created_at` is kept from the first insert; `last_synced_at` and
    /// `updated_at` are bumped. Applying the same job twice leaves the same
    /// field values.
    pub async fn upsert(&self, job: &NormalizedJob) -> Result<()> {
        let now = to_db_string(&crate::time::now());
        let sql = format!(
            r#"
            INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                task_id = excluded.task_id,
                task_name = excluded.task_name,
                project_id = excluded.project_id,
                project_name = excluded.project_name,
                assignee = excluded.assignee,
                status = excluded.status,
                stage = excluded.stage,
                state = excluded.state,
                manual_annotation_count = excluded.manual_annotation_count,
                interpolated_annotation_count = excluded.interpolated_annotation_count,
                total_annotation_count = excluded.total_annotation_count,
                remote_url = excluded.remote_url,
                raw_payload = excluded.raw_payload,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at
            "#,
            TASK_COLUMNS
        );
        bind_job(sqlx::query(&sql), job, &now)?
            .execute(&self.pool)
            .await?;

        debug!(job_id = job.job_id, "upserted task");
        Ok(())
    }

    /// Insert a job, or update only the fields a partial record carried
    ///
    /// Used for webhook deliveries, which describe a change rather than the
    /// whole job. Columns the record did not carry keep their stored values;
    /// a new row gets the record's values with absent fields null/zero.
    /// `raw_payload`, `last_synced_at` and `updated_at` are always replaced.
    pub async fn merge(&self, job: &NormalizedJob, fields: JobFields) -> Result<()> {
        let now = to_db_string(&crate::time::now());

        let mut columns: Vec<&str> = Vec::new();
        if fields.task_id {
            columns.extend(["task_id", "remote_url"]);
        }
        let optional = [
            (fields.task_name, "task_name"),
            (fields.project_id, "project_id"),
            (fields.project_name, "project_name"),
            (fields.assignee, "assignee"),
            (fields.status, "status"),
            (fields.stage, "stage"),
            (fields.state, "state"),
        ];
        columns.extend(optional.iter().filter(|(carried, _)| *carried).map(|(_, col)| *col));
        if fields.annotation_counts {
            columns.extend([
                "manual_annotation_count",
                "interpolated_annotation_count",
                "total_annotation_count",
            ]);
        }
        columns.extend(["raw_payload", "last_synced_at", "updated_at"]);

        let assignments: Vec<String> = columns
            .iter()
            .map(|col| format!("{col} = excluded.{col}"))
            .collect();
        let sql = format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET {}",
            TASK_COLUMNS,
            assignments.join(", ")
        );
        bind_job(sqlx::query(&sql), job, &now)?
            .execute(&self.pool)
            .await?;

        debug!(job_id = job.job_id, ?fields, "merged task");
        Ok(())
    }

    /// Remove a task; returns whether a row existed
    pub async fn delete(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every job belonging to a remote task
    pub async fn delete_by_task(&self, task_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of rows matching a list filter
    pub async fn count_filtered(&self, filter: &TaskListFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks WHERE 1 = 1");
        push_list_filter(&mut qb, filter);
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// One page of tasks for the read API
    pub async fn list(
        &self,
        filter: &TaskListFilter,
        sort: TaskSort,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM tasks WHERE 1 = 1",
            TASK_COLUMNS
        ));
        push_list_filter(&mut qb, filter);

        // Sort column comes from a fixed whitelist, never from the request
        qb.push(" ORDER BY ")
            .push(sort.column())
            .push(" ")
            .push(order.sql());
        if sort != TaskSort::JobId {
            qb.push(", job_id DESC");
        }
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Sorted non-null values of a column, for filter dropdowns
    pub async fn distinct_values(&self, column: DistinctColumn) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM tasks WHERE {col} IS NOT NULL ORDER BY {col}",
            col = column.column()
        );
        let values: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(values)
    }

    pub async fn annotation_totals(&self) -> Result<TotalsSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS task_count, COALESCE(SUM(total_annotation_count), 0) AS total \
             FROM tasks",
        )
        .fetch_one(&self.pool)
        .await?;

        let task_count: i64 = row.try_get("task_count")?;
        let total_annotations: i64 = row.try_get("total")?;
        let average_per_task = if task_count == 0 {
            0.0
        } else {
            total_annotations as f64 / task_count as f64
        };

        Ok(TotalsSummary {
            task_count,
            total_annotations,
            average_per_task,
        })
    }

    /// Annotation totals grouped by a column, largest first
    pub async fn totals_by(&self, group: TotalsGroup) -> Result<Vec<GroupTotal>> {
        let sql = format!(
            "SELECT {col} AS key, COALESCE(SUM(total_annotation_count), 0) AS total, \
             COUNT(*) AS task_count FROM tasks GROUP BY {col} ORDER BY total DESC, key ASC",
            col = group.column()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<GroupTotal> {
                Ok(GroupTotal {
                    key: row.try_get("key")?,
                    total_annotations: row.try_get("total")?,
                    task_count: row.try_get("task_count")?,
                })
            })
            .collect()
    }
}

fn push_list_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskListFilter) {
    if let Some(project_name) = &filter.project_name {
        qb.push(" AND project_name = ").push_bind(project_name.clone());
    }
    if let Some(assignee) = &filter.assignee {
        qb.push(" AND assignee = ").push_bind(assignee.clone());
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ").push_bind(status.clone());
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        qb.push(" AND (instr(lower(COALESCE(task_name, '')), ")
            .push_bind(needle.clone())
            .push(") > 0 OR instr(lower(COALESCE(project_name, '')), ")
            .push_bind(needle)
            .push(") > 0)");
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Bind all 17 columns in `TASK_COLUMNS` order
fn bind_job<'q>(query: SqliteQuery<'q>, job: &NormalizedJob, now: &str) -> Result<SqliteQuery<'q>> {
    let raw_payload = serde_json::to_string(&job.raw_payload)
        .map_err(|e| Error::InvalidInput(format!("raw payload not serializable: {}", e)))?;
    let manual = job.manual_annotation_count.max(0);
    let interpolated = job.interpolated_annotation_count.max(0);
    let total = manual.checked_add(interpolated).ok_or_else(|| {
        Error::InvalidInput(format!(
            "annotation counts for job {} overflow their total",
            job.job_id
        ))
    })?;

    Ok(query
        .bind(job.job_id)
        .bind(job.task_id)
        .bind(job.task_name.clone())
        .bind(job.project_id)
        .bind(job.project_name.clone())
        .bind(job.assignee.clone())
        .bind(job.status.clone())
        .bind(job.stage.clone())
        .bind(job.state.clone())
        .bind(manual)
        .bind(interpolated)
        .bind(total)
        .bind(job.remote_url.clone())
        .bind(raw_payload)
        .bind(now.to_string())
        .bind(now.to_string())
        .bind(now.to_string()))
}

fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    parse_db_string(&value)
}

fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    let raw_payload: String = row.try_get("raw_payload")?;
    let raw_payload = serde_json::from_str(&raw_payload)
        .map_err(|e| Error::CorruptRow(format!("raw_payload is not JSON: {}", e)))?;

    Ok(TaskRecord {
        job_id: row.try_get("job_id")?,
        task_id: row.try_get("task_id")?,
        task_name: row.try_get("task_name")?,
        project_id: row.try_get("project_id")?,
        project_name: row.try_get("project_name")?,
        assignee: row.try_get("assignee")?,
        status: row.try_get("status")?,
        stage: row.try_get("stage")?,
        state: row.try_get("state")?,
        manual_annotation_count: row.try_get("manual_annotation_count")?,
        interpolated_annotation_count: row.try_get("interpolated_annotation_count")?,
        total_annotation_count: row.try_get("total_annotation_count")?,
        remote_url: row.try_get("remote_url")?,
        raw_payload,
        last_synced_at: timestamp_column(row, "last_synced_at")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}
