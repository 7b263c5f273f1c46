//! Data model for mirrored jobs and webhook audit entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One remote job in canonical shape, ready to be written to the mirror
///
/// Produced once at the boundary (Remote Client or Webhook Verifier); nothing
/// downstream looks at untyped remote maps except `raw_payload`, which is kept
/// for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub job_id: i64,
    pub task_id: i64,
    pub task_name: Option<String>,
    pub project_id: Option<i64>,
    pub project_name: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<String>,
    pub stage: Option<String>,
    pub state: Option<String>,
    pub manual_annotation_count: i64,
    pub interpolated_annotation_count: i64,
    pub remote_url: String,
    pub raw_payload: Value,
}

impl NormalizedJob {
    /// Total is never taken from input; it is always manual + interpolated
    pub fn total_annotation_count(&self) -> i64 {
        self.manual_annotation_count
            .saturating_add(self.interpolated_annotation_count)
    }
}

/// Which mirrored fields a partial job record actually carried
///
/// Webhook deliveries describe a change, not the whole job; a field that is
/// absent from the record must not overwrite the stored value. An explicit
/// `null` counts as carried (for example an unassigned job).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFields {
    /// Also governs `remote_url`, which is derived from it
    pub task_id: bool,
    pub task_name: bool,
    pub project_id: bool,
    pub project_name: bool,
    pub assignee: bool,
    pub status: bool,
    pub stage: bool,
    pub state: bool,
    pub annotation_counts: bool,
}

impl JobFields {
    /// Every field, as for a complete record from the listing endpoint
    pub fn all() -> Self {
        Self {
            task_id: true,
            task_name: true,
            project_id: true,
            project_name: true,
            assignee: true,
            status: true,
            stage: true,
            state: true,
            annotation_counts: true,
        }
    }
}

/// Mirror Store row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub job_id: i64,
    pub task_id: i64,
    pub task_name: Option<String>,
    pub project_id: Option<i64>,
    pub project_name: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<String>,
    pub stage: Option<String>,
    pub state: Option<String>,
    pub manual_annotation_count: i64,
    pub interpolated_annotation_count: i64,
    pub total_annotation_count: i64,
    pub remote_url: String,
    pub raw_payload: Value,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Rough progress derived from the remote status
    pub fn completion_percentage(&self) -> u8 {
        match self
            .status
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("completed") => 100,
            Some("validation") => 90,
            Some("annotation") => 50,
            _ => 0,
        }
    }
}

/// Filter applied to a sync run
///
/// Sent to the remote as query parameters and re-applied locally, so a remote
/// that ignores a parameter still yields only matching jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub assignee: Option<String>,
    pub status: Option<String>,
}

impl JobFilter {
    pub fn is_empty(&self) -> bool {
        self.project_id.is_none()
            && self.task_id.is_none()
            && self.assignee.is_none()
            && self.status.is_none()
    }

    /// Query parameters for the remote listing endpoint
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(project_id) = self.project_id {
            pairs.push(("project_id", project_id.to_string()));
        }
        if let Some(task_id) = self.task_id {
            pairs.push(("task_id", task_id.to_string()));
        }
        if let Some(assignee) = &self.assignee {
            pairs.push(("assignee", assignee.clone()));
        }
        if let Some(status) = &self.status {
            pairs.push(("status", status.clone()));
        }
        pairs
    }

    pub fn matches(&self, job: &NormalizedJob) -> bool {
        if let Some(project_id) = self.project_id {
            if job.project_id != Some(project_id) {
                return false;
            }
        }
        if let Some(task_id) = self.task_id {
            if job.task_id != task_id {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if job.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if job.status.as_deref() != Some(status.as_str()) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for JobFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        let parts: Vec<String> = self
            .query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Webhook event kind as recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "create:job")]
    CreateJob,
    #[serde(rename = "update:job")]
    UpdateJob,
    #[serde(rename = "delete:job")]
    DeleteJob,
    #[serde(rename = "create:task")]
    CreateTask,
    #[serde(rename = "update:task")]
    UpdateTask,
    #[serde(rename = "delete:task")]
    DeleteTask,
    #[serde(rename = "unknown")]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CreateJob => "create:job",
            EventType::UpdateJob => "update:job",
            EventType::DeleteJob => "delete:job",
            EventType::CreateTask => "create:task",
            EventType::UpdateTask => "update:task",
            EventType::DeleteTask => "delete:task",
            EventType::Unknown => "unknown",
        }
    }

    /// Map the remote `event` string; anything unrecognized is `Unknown`
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "create:job" => EventType::CreateJob,
            "update:job" => EventType::UpdateJob,
            "delete:job" => EventType::DeleteJob,
            "create:task" => EventType::CreateTask,
            "update:task" => EventType::UpdateTask,
            "delete:task" => EventType::DeleteTask,
            _ => EventType::Unknown,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit Entry state machine: pending → processing → success | error
///
/// Boundary rejections go straight from pending to error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Pending,
    Processing,
    Success,
    Error,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processing => "processing",
            ProcessingState::Success => "success",
            ProcessingState::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ProcessingState::Pending),
            "processing" => Some(ProcessingState::Processing),
            "success" => Some(ProcessingState::Success),
            "error" => Some(ProcessingState::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingState::Success | ProcessingState::Error)
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit Log row: one inbound webhook delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event_type: EventType,
    /// Referenced by value only; stays valid after the Task Record is deleted
    pub job_id: Option<i64>,
    pub processing_state: ProcessingState,
    pub payload: Value,
    pub source_address: Option<String>,
    pub error_detail: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
