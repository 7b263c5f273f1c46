//! Webhook Verifier
//!
//! Checks run in this order, cheapest first:
//! 1. Content type must be `application/json`
//! 2. Body must not exceed the configured size
//! 3. `X-Signature-256` must equal `sha256=<hex HMAC-SHA256(secret, raw body)>`
//! 4. Body must parse into a known event shape
//!
//! The signature is computed over the exact bytes received, before any
//! parsing. A missing or garbled header costs the same MAC computation and
//! constant-time comparison as a wrong one, and maps to the same rejection.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::{InboundRequest, SIGNATURE_HEADER};
use crate::models::{EventType, NormalizedJob};
use crate::normalize::{as_int, normalize_job};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";
const MAC_LEN: usize = 32;

/// Why a signature header was not accepted (audit log detail only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFault {
    Missing,
    BadPrefix,
    BadEncoding,
    Mismatch,
}

impl fmt::Display for SignatureFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SignatureFault::Missing => "header missing",
            SignatureFault::BadPrefix => "header lacks sha256= prefix",
            SignatureFault::BadEncoding => "header is not a 32-byte hex digest",
            SignatureFault::Mismatch => "digest mismatch",
        };
        f.write_str(text)
    }
}

/// Boundary rejection of a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid signature: {0}")]
    SignatureInvalid(SignatureFault),

    #[error("malformed payload: {0}")]
    PayloadMalformed(String),
}

impl VerifyError {
    /// HTTP status returned to the caller
    pub fn status_code(&self) -> u16 {
        match self {
            VerifyError::UnsupportedContentType(_) => 415,
            VerifyError::PayloadTooLarge { .. } => 413,
            VerifyError::SignatureInvalid(_) => 401,
            VerifyError::PayloadMalformed(_) => 400,
        }
    }
}

/// A delivery that passed every check, as a closed set of event shapes
#[derive(Debug, Clone, PartialEq)]
pub enum VerifiedEvent {
    CreateJob(NormalizedJob),
    UpdateJob(NormalizedJob),
    DeleteJob { job_id: i64 },
    /// One record per job listed in `task.jobs`, task-level fields filled in
    CreateTask { task_id: i64, jobs: Vec<NormalizedJob> },
    UpdateTask { task_id: i64, jobs: Vec<NormalizedJob> },
    DeleteTask { task_id: i64 },
    Unknown { event: String },
}

impl VerifiedEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            VerifiedEvent::CreateJob(_) => EventType::CreateJob,
            VerifiedEvent::UpdateJob(_) => EventType::UpdateJob,
            VerifiedEvent::DeleteJob { .. } => EventType::DeleteJob,
            VerifiedEvent::CreateTask { .. } => EventType::CreateTask,
            VerifiedEvent::UpdateTask { .. } => EventType::UpdateTask,
            VerifiedEvent::DeleteTask { .. } => EventType::DeleteTask,
            VerifiedEvent::Unknown { .. } => EventType::Unknown,
        }
    }

    pub fn job_id(&self) -> Option<i64> {
        match self {
            VerifiedEvent::CreateJob(job) | VerifiedEvent::UpdateJob(job) => Some(job.job_id),
            VerifiedEvent::DeleteJob { job_id } => Some(*job_id),
            VerifiedEvent::CreateTask { .. }
            | VerifiedEvent::UpdateTask { .. }
            | VerifiedEvent::DeleteTask { .. }
            | VerifiedEvent::Unknown { .. } => None,
        }
    }
}

/// Keyed verifier for one shared secret
#[derive(Clone)]
pub struct WebhookVerifier {
    mac: HmacSha256,
    web_url: String,
    max_body_bytes: usize,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("web_url", &self.web_url)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// `web_url` is used to build `remote_url` for jobs carried by events
    pub fn new(secret: &[u8], web_url: &str, max_body_bytes: usize) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("webhook secret must not be empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| Error::Config(format!("unusable webhook secret: {}", e)))?;

        Ok(Self {
            mac,
            web_url: web_url.to_string(),
            max_body_bytes,
        })
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// `sha256=<hex>` header value for a body
    pub fn sign(&self, raw_body: &[u8]) -> String {
        format!("{}{}", SIGNATURE_PREFIX, hex::encode(self.digest(raw_body)))
    }

    fn digest(&self, raw_body: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(raw_body);
        mac.finalize().into_bytes().to_vec()
    }

    /// Run every boundary check against a plain request
    pub fn verify_request(&self, request: &InboundRequest) -> std::result::Result<VerifiedEvent, VerifyError> {
        let content_type = request.header("content-type");
        if !is_json_content_type(content_type) {
            return Err(VerifyError::UnsupportedContentType(
                content_type.unwrap_or("<none>").to_string(),
            ));
        }

        if request.body_len() > self.max_body_bytes {
            return Err(VerifyError::PayloadTooLarge {
                size: request.body_len(),
                max: self.max_body_bytes,
            });
        }

        self.verify(&request.body, request.header(SIGNATURE_HEADER))
    }

    /// Signature check followed by event parsing
    pub fn verify(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> std::result::Result<VerifiedEvent, VerifyError> {
        self.verify_signature(raw_body, signature_header)?;
        parse_event(raw_body, &self.web_url)
    }

    pub fn verify_signature(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> std::result::Result<(), VerifyError> {
        let expected = self.digest(raw_body);

        let (candidate, fault) = match decode_signature_header(signature_header) {
            Ok(bytes) => (bytes, None),
            Err(fault) => (vec![0u8; MAC_LEN], Some(fault)),
        };
        let equal: bool = expected.as_slice().ct_eq(candidate.as_slice()).into();

        match (fault, equal) {
            (Some(fault), _) => Err(VerifyError::SignatureInvalid(fault)),
            (None, true) => Ok(()),
            (None, false) => Err(VerifyError::SignatureInvalid(SignatureFault::Mismatch)),
        }
    }
}

fn decode_signature_header(header: Option<&str>) -> std::result::Result<Vec<u8>, SignatureFault> {
    let header = header.ok_or(SignatureFault::Missing)?.trim();
    let hex_digest = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(SignatureFault::BadPrefix)?;
    let bytes = hex::decode(hex_digest).map_err(|_| SignatureFault::BadEncoding)?;
    if bytes.len() != MAC_LEN {
        return Err(SignatureFault::BadEncoding);
    }
    Ok(bytes)
}

/// Media type must be `application/json`; parameters such as charset are ignored
pub fn is_json_content_type(value: Option<&str>) -> bool {
    value
        .and_then(|v| v.split(';').next())
        .map(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Parse a verified body into an event
pub fn parse_event(raw_body: &[u8], web_url: &str) -> std::result::Result<VerifiedEvent, VerifyError> {
    let value: Value = serde_json::from_slice(raw_body)
        .map_err(|e| VerifyError::PayloadMalformed(format!("invalid JSON: {}", e)))?;

    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| VerifyError::PayloadMalformed("missing 'event' string".to_string()))?;

    let job = |value: &Value| -> std::result::Result<NormalizedJob, VerifyError> {
        let job = value
            .get("job")
            .ok_or_else(|| VerifyError::PayloadMalformed("missing 'job' object".to_string()))?;
        normalize_job(job, web_url).map_err(|e| VerifyError::PayloadMalformed(e.to_string()))
    };

    match EventType::from_event_name(event) {
        EventType::CreateJob => Ok(VerifiedEvent::CreateJob(job(&value)?)),
        EventType::UpdateJob => Ok(VerifiedEvent::UpdateJob(job(&value)?)),
        EventType::DeleteJob => Ok(VerifiedEvent::DeleteJob {
            job_id: job(&value)?.job_id,
        }),
        EventType::CreateTask => {
            let (task_id, jobs) = task_jobs(&value, web_url)?;
            Ok(VerifiedEvent::CreateTask { task_id, jobs })
        }
        EventType::UpdateTask => {
            let (task_id, jobs) = task_jobs(&value, web_url)?;
            Ok(VerifiedEvent::UpdateTask { task_id, jobs })
        }
        EventType::DeleteTask => Ok(VerifiedEvent::DeleteTask {
            task_id: task_id(&value)?,
        }),
        EventType::Unknown => Ok(VerifiedEvent::Unknown {
            event: event.to_string(),
        }),
    }
}

fn task_id(value: &Value) -> std::result::Result<i64, VerifyError> {
    value
        .get("task")
        .and_then(|task| task.get("id"))
        .and_then(as_int)
        .ok_or_else(|| VerifyError::PayloadMalformed("missing 'task.id'".to_string()))
}

/// Fields a task carries that also describe each of its jobs
const TASK_LEVEL_FIELDS: [&str; 5] = ["project_id", "assignee", "status", "stage", "state"];

/// Job records for a task event
///
/// Entries of `task.jobs` may be job objects or bare ids. Each gets the
/// task's id and name, plus any task-level field the entry does not set
/// itself. A task without a jobs array yields no records.
fn task_jobs(
    value: &Value,
    web_url: &str,
) -> std::result::Result<(i64, Vec<NormalizedJob>), VerifyError> {
    let task_id = task_id(value)?;
    let task = value.get("task").and_then(Value::as_object);
    let entries = task
        .and_then(|t| t.get("jobs"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut jobs = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut record = match entry {
            Value::Object(obj) => obj.clone(),
            id => Map::from_iter([("id".to_string(), id.clone())]),
        };
        record.insert("task_id".to_string(), Value::from(task_id));
        if let Some(task) = task {
            if let Some(name) = task.get("name") {
                record
                    .entry("task_name")
                    .or_insert_with(|| name.clone());
            }
            for key in TASK_LEVEL_FIELDS {
                if let Some(field) = task.get(key) {
                    record.entry(key).or_insert_with(|| field.clone());
                }
            }
        }

        let job = normalize_job(&Value::Object(record), web_url)
            .map_err(|e| VerifyError::PayloadMalformed(format!("task {} job: {}", task_id, e)))?;
        jobs.push(job);
    }
    Ok((task_id, jobs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"shared-webhook-secret";
    const WEB: &str = "https://annotate.example.org";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET, WEB, 1024).unwrap()
    }

    fn update_body() -> Vec<u8> {
        br#"{"event":"update:job","job":{"id":123,"task_id":456,"status":"completed"}}"#.to_vec()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let v = verifier();
        let body = update_body();
        let signature = v.sign(&body);

        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);

        let event = v.verify(&body, Some(&signature)).unwrap();
        match event {
            VerifiedEvent::UpdateJob(job) => {
                assert_eq!(job.job_id, 123);
                assert_eq!(job.task_id, 456);
                assert_eq!(job.status.as_deref(), Some("completed"));
                assert_eq!(job.remote_url, "https://annotate.example.org/tasks/456/jobs/123");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_any_altered_byte_rejected() {
        let v = verifier();
        let body = update_body();
        let signature = v.sign(&body);

        for index in 0..body.len() {
            let mut tampered = body.clone();
            tampered[index] ^= 0x01;
            assert_eq!(
                v.verify_signature(&tampered, Some(&signature)),
                Err(VerifyError::SignatureInvalid(SignatureFault::Mismatch)),
                "byte {} altered but signature still accepted",
                index
            );
        }
    }

    #[test]
    fn test_known_digest() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let v = WebhookVerifier::new(b"key", WEB, 1024).unwrap();
        assert_eq!(
            v.sign(b"The quick brown fox jumps over the lazy dog"),
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_other_secret_rejected() {
        let body = update_body();
        let other = WebhookVerifier::new(b"someone-else", WEB, 1024).unwrap();
        let signature = other.sign(&body);

        assert!(matches!(
            verifier().verify(&body, Some(&signature)),
            Err(VerifyError::SignatureInvalid(SignatureFault::Mismatch))
        ));
    }

    #[test]
    fn test_missing_and_malformed_headers_rejected_alike() {
        let v = verifier();
        let body = update_body();
        let digest = v.sign(&body);
        let bare_hex = digest.trim_start_matches("sha256=").to_string();

        let cases = [
            (None, SignatureFault::Missing),
            (Some(bare_hex.as_str()), SignatureFault::BadPrefix),
            (Some("sha256=zz"), SignatureFault::BadEncoding),
            (Some("sha256=abcd"), SignatureFault::BadEncoding),
        ];

        for (header, fault) in cases {
            let err = v.verify(&body, header).unwrap_err();
            assert_eq!(err, VerifyError::SignatureInvalid(fault));
            assert_eq!(err.status_code(), 401);
        }
    }

    #[test]
    fn test_content_type_checked_before_signature() {
        let v = verifier();
        let request = InboundRequest::new(update_body()).with_header("Content-Type", "text/plain");

        let err = v.verify_request(&request).unwrap_err();
        assert_eq!(err, VerifyError::UnsupportedContentType("text/plain".to_string()));
        assert_eq!(err.status_code(), 415);
    }

    #[test]
    fn test_content_type_parameters_ignored() {
        assert!(is_json_content_type(Some("application/json")));
        assert!(is_json_content_type(Some("Application/JSON; charset=utf-8")));
        assert!(!is_json_content_type(Some("application/json-patch+json")));
        assert!(!is_json_content_type(None));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let v = WebhookVerifier::new(SECRET, WEB, 16).unwrap();
        let body = update_body();
        let request = InboundRequest::new(body.clone())
            .with_header("content-type", "application/json")
            .with_header("x-signature-256", &v.sign(&body));

        let err = v.verify_request(&request).unwrap_err();
        assert_eq!(err.status_code(), 413);
    }

    #[test]
    fn test_malformed_after_valid_signature() {
        let v = verifier();
        for body in [
            b"not json".to_vec(),
            br#"{"job":{"id":1}}"#.to_vec(),
            br#"{"event":"update:job"}"#.to_vec(),
            br#"{"event":"create:job","job":{"task_id":3}}"#.to_vec(),
            br#"{"event":"delete:task","task":{}}"#.to_vec(),
        ] {
            let err = v.verify(&body, Some(&v.sign(&body))).unwrap_err();
            assert!(matches!(err, VerifyError::PayloadMalformed(_)), "{:?}", err);
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn test_event_variants() {
        let web = WEB;
        assert_eq!(
            parse_event(br#"{"event":"delete:job","job":{"id":5}}"#, web).unwrap(),
            VerifiedEvent::DeleteJob { job_id: 5 }
        );
        assert_eq!(
            parse_event(br#"{"event":"delete:task","task":{"id":9}}"#, web).unwrap(),
            VerifiedEvent::DeleteTask { task_id: 9 }
        );
        let unknown = parse_event(br#"{"event":"ping"}"#, web).unwrap();
        assert_eq!(unknown.event_type(), EventType::Unknown);
        assert_eq!(unknown.job_id(), None);
    }

    #[test]
    fn test_delete_task_accepts_numeric_string_id() {
        assert_eq!(
            parse_event(br#"{"event":"delete:task","task":{"id":"9"}}"#, WEB).unwrap(),
            VerifiedEvent::DeleteTask { task_id: 9 }
        );
    }

    #[test]
    fn test_task_event_lists_jobs_with_task_fields() {
        let body = br#"{"event":"update:task","task":{
            "id": 456,
            "name": "street-cams",
            "project_id": 9,
            "assignee": {"username": "ana"},
            "status": "annotation",
            "jobs": [{"id": 123, "status": "validation"}, 124]
        }}"#;

        let VerifiedEvent::UpdateTask { task_id, jobs } = parse_event(body, WEB).unwrap() else {
            panic!("expected update:task");
        };
        assert_eq!(task_id, 456);
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].job_id, 123);
        assert_eq!(jobs[0].task_id, 456);
        assert_eq!(jobs[0].task_name.as_deref(), Some("street-cams"));
        assert_eq!(jobs[0].project_id, Some(9));
        assert_eq!(jobs[0].assignee.as_deref(), Some("ana"));
        // Job-level value wins over the task's
        assert_eq!(jobs[0].status.as_deref(), Some("validation"));
        assert_eq!(jobs[0].remote_url, "https://annotate.example.org/tasks/456/jobs/123");

        assert_eq!(jobs[1].job_id, 124);
        assert_eq!(jobs[1].status.as_deref(), Some("annotation"));
    }

    #[test]
    fn test_task_event_without_jobs_array() {
        let body = br#"{"event":"create:task","task":{"id":7,"jobs":{"count":0}}}"#;
        assert_eq!(
            parse_event(body, WEB).unwrap(),
            VerifiedEvent::CreateTask {
                task_id: 7,
                jobs: Vec::new()
            }
        );

        let bad = br#"{"event":"create:task","task":{"id":7,"jobs":[{"name":"x"}]}}"#;
        assert!(matches!(
            parse_event(bad, WEB),
            Err(VerifyError::PayloadMalformed(_))
        ));
    }

    #[test]
    fn test_empty_secret_refused() {
        assert!(WebhookVerifier::new(b"", WEB, 1024).is_err());
    }
}
