//! Normalization of remote job records into [`NormalizedJob`]
//!
//! The remote platform is not consistent about field names or shapes: the
//! listing endpoint nests `assignee` as an object, webhook payloads sometimes
//! carry a bare username, ids occasionally arrive as numeric strings, and the
//! parent task can be an id or an embedded object. Everything is resolved
//! here, once. Absent optional fields become `None` / 0; only a record
//! without a usable job id is rejected.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{JobFields, NormalizedJob};

/// Record cannot be turned into a [`NormalizedJob`] at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("job record is not a JSON object")]
    NotAnObject,

    #[error("job record has no usable id")]
    MissingJobId,
}

/// Annotation counts for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationCounts {
    pub manual: i64,
    pub interpolated: i64,
}

impl AnnotationCounts {
    pub fn total(&self) -> i64 {
        self.manual.saturating_add(self.interpolated)
    }
}

/// Deterministic link to the job in the remote web UI
pub fn job_url(web_url: &str, task_id: i64, job_id: i64) -> String {
    format!(
        "{}/tasks/{}/jobs/{}",
        web_url.trim_end_matches('/'),
        task_id,
        job_id
    )
}

/// Normalize one remote job object
pub fn normalize_job(value: &Value, web_url: &str) -> Result<NormalizedJob, NormalizeError> {
    let obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;

    let job_id = int_field(obj, &["id", "job_id"]).ok_or(NormalizeError::MissingJobId)?;

    let task = obj.get("task");
    let task_id = int_field(obj, &["task_id"])
        .or_else(|| task.and_then(as_int))
        .or_else(|| task.and_then(Value::as_object).and_then(|t| int_field(t, &["id"])))
        .unwrap_or(0);
    let task_name = str_field(obj, &["task_name"]).or_else(|| {
        task.and_then(Value::as_object)
            .and_then(|t| str_field(t, &["name"]))
    });

    let project = obj.get("project");
    let project_id = int_field(obj, &["project_id"])
        .or_else(|| project.and_then(as_int))
        .or_else(|| {
            project
                .and_then(Value::as_object)
                .and_then(|p| int_field(p, &["id"]))
        });
    let project_name = str_field(obj, &["project_name"]).or_else(|| {
        project
            .and_then(Value::as_object)
            .and_then(|p| str_field(p, &["name"]))
    });

    let manual = int_field(obj, &["manual_annotation_count", "manual_annotations"])
        .unwrap_or(0)
        .max(0);
    let interpolated = int_field(
        obj,
        &["interpolated_annotation_count", "interpolated_annotations"],
    )
    .unwrap_or(0)
    .max(0);

    Ok(NormalizedJob {
        job_id,
        task_id,
        task_name,
        project_id,
        project_name,
        assignee: obj.get("assignee").and_then(assignee_name),
        status: str_field(obj, &["status"]),
        stage: str_field(obj, &["stage"]),
        state: str_field(obj, &["state"]),
        manual_annotation_count: manual,
        interpolated_annotation_count: interpolated,
        remote_url: job_url(web_url, task_id, job_id),
        raw_payload: value.clone(),
    })
}

/// Fields a job record carries, using the same keys as [`normalize_job`]
///
/// A key present with any value, `null` included, counts as carried. A
/// record that is not an object carries nothing.
pub fn carried_fields(value: &Value) -> JobFields {
    let Some(obj) = value.as_object() else {
        return JobFields::default();
    };
    let has = |keys: &[&str]| keys.iter().any(|key| obj.contains_key(*key));
    let nested_name = |key: &str| {
        obj.get(key)
            .and_then(Value::as_object)
            .map_or(false, |o| o.contains_key("name"))
    };

    JobFields {
        task_id: has(&["task_id", "task"]),
        task_name: has(&["task_name"]) || nested_name("task"),
        project_id: has(&["project_id", "project"]),
        project_name: has(&["project_name"]) || nested_name("project"),
        assignee: has(&["assignee"]),
        status: has(&["status"]),
        stage: has(&["stage"]),
        state: has(&["state"]),
        annotation_counts: has(&[
            "manual_annotation_count",
            "manual_annotations",
            "interpolated_annotation_count",
            "interpolated_annotations",
        ]),
    }
}

/// Count annotations in a `/jobs/{id}/annotations` response
///
/// Plain shapes are manual. Inside tracks, keyframes are manual and the rest
/// interpolated; shapes flagged `outside` are not annotations.
pub fn count_annotations(annotations: &Value) -> AnnotationCounts {
    let direct = annotations
        .get("shapes")
        .and_then(Value::as_array)
        .map_or(0, |shapes| shapes.len() as i64);

    let mut counts = AnnotationCounts {
        manual: direct,
        interpolated: 0,
    };

    let tracks = annotations
        .get("tracks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for track in tracks {
        let shapes = track
            .get("shapes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for shape in shapes {
            if flag(shape, "outside") {
                continue;
            }
            if flag(shape, "keyframe") {
                counts.manual += 1;
            } else {
                counts.interpolated += 1;
            }
        }
    }

    counts
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Integer from a number or numeric string
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn int_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| obj.get(*key).and_then(as_int))
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn assignee_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => str_field(obj, &["username", "name"]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEB: &str = "https://annotate.example.org/";

    #[test]
    fn test_listing_record_normalizes() {
        let raw = json!({
            "id": 77,
            "task_id": 12,
            "project_id": 3,
            "assignee": {"id": 5, "username": "ana"},
            "status": "annotation",
            "stage": "annotation",
            "state": "in progress"
        });

        let job = normalize_job(&raw, WEB).unwrap();
        assert_eq!(job.job_id, 77);
        assert_eq!(job.task_id, 12);
        assert_eq!(job.project_id, Some(3));
        assert_eq!(job.assignee.as_deref(), Some("ana"));
        assert_eq!(job.state.as_deref(), Some("in progress"));
        assert_eq!(job.remote_url, "https://annotate.example.org/tasks/12/jobs/77");
        assert_eq!(job.raw_payload, raw);
    }

    #[test]
    fn test_absent_optional_fields_default() {
        let job = normalize_job(&json!({"id": 9}), WEB).unwrap();
        assert_eq!(job.task_id, 0);
        assert_eq!(job.task_name, None);
        assert_eq!(job.assignee, None);
        assert_eq!(job.status, None);
        assert_eq!(job.manual_annotation_count, 0);
        assert_eq!(job.total_annotation_count(), 0);
    }

    #[test]
    fn test_heterogeneous_shapes() {
        let raw = json!({
            "job_id": "41",
            "task": {"id": 8, "name": "street-cams"},
            "project": {"id": "2", "name": "Traffic"},
            "assignee": "bruno",
            "manual_annotations": 10,
            "interpolated_annotations": -4
        });

        let job = normalize_job(&raw, WEB).unwrap();
        assert_eq!(job.job_id, 41);
        assert_eq!(job.task_id, 8);
        assert_eq!(job.task_name.as_deref(), Some("street-cams"));
        assert_eq!(job.project_id, Some(2));
        assert_eq!(job.project_name.as_deref(), Some("Traffic"));
        assert_eq!(job.assignee.as_deref(), Some("bruno"));
        assert_eq!(job.manual_annotation_count, 10);
        assert_eq!(job.interpolated_annotation_count, 0);
    }

    #[test]
    fn test_null_assignee_is_none() {
        let job = normalize_job(&json!({"id": 1, "assignee": null}), WEB).unwrap();
        assert_eq!(job.assignee, None);
    }

    #[test]
    fn test_missing_id_rejected() {
        assert_eq!(
            normalize_job(&json!({"task_id": 4}), WEB),
            Err(NormalizeError::MissingJobId)
        );
        assert_eq!(
            normalize_job(&json!({"id": "abc"}), WEB),
            Err(NormalizeError::MissingJobId)
        );
        assert_eq!(normalize_job(&json!([1, 2]), WEB), Err(NormalizeError::NotAnObject));
    }

    #[test]
    fn test_count_annotations_tracks() {
        let annotations = json!({
            "shapes": [{"type": "rectangle"}, {"type": "polygon"}],
            "tracks": [
                {"shapes": [
                    {"keyframe": true, "outside": false},
                    {"keyframe": false, "outside": false},
                    {"keyframe": false},
                    {"keyframe": true, "outside": true}
                ]},
                {"shapes": []}
            ]
        });

        let counts = count_annotations(&annotations);
        assert_eq!(counts.manual, 3);
        assert_eq!(counts.interpolated, 2);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_carried_fields_follow_present_keys() {
        let fields = carried_fields(&json!({
            "id": 1,
            "task": {"id": 4, "name": "street-cams"},
            "assignee": null,
            "status": "completed"
        }));
        assert_eq!(
            fields,
            JobFields {
                task_id: true,
                task_name: true,
                assignee: true,
                status: true,
                ..Default::default()
            }
        );

        let counts = carried_fields(&json!({"id": 1, "project": 3, "interpolated_annotations": 2}));
        assert!(counts.annotation_counts);
        assert!(counts.project_id);
        assert!(!counts.project_name);

        assert_eq!(carried_fields(&json!([1])), JobFields::default());
    }

    #[test]
    fn test_count_annotations_empty_response() {
        assert_eq!(count_annotations(&json!({})), AnnotationCounts::default());
    }
}
