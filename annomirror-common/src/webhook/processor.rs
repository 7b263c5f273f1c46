//! Webhook Processor
//!
//! Owns the per-delivery audit state machine:
//!
//! ```text
//! pending ──► processing ──► success
//!    │             │
//!    └─────────────┴──────► error
//! ```
//!
//! The audit entry is written before any check runs, so rejected and failed
//! deliveries leave a trail too. Store failures end the delivery in `error`
//! with no retry; the remote platform redelivers on its own schedule.

use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::verify::{VerifiedEvent, WebhookVerifier};
use super::{InboundRequest, WebhookResponse};
use crate::db::{AuditLog, TaskStore};
use crate::models::NormalizedJob;
use crate::normalize::carried_fields;

/// What a verified event did to the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Upserted { job_id: i64 },
    Deleted { job_id: i64, existed: bool },
    TaskUpserted { task_id: i64, jobs: usize },
    TaskDeleted { task_id: i64, removed: u64 },
    Ignored { event: String },
    Failed { detail: String },
}

impl ProcessingOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessingOutcome::Failed { .. })
    }
}

/// Applies webhook deliveries to the Mirror Store, recording each in the Audit Log
#[derive(Debug, Clone)]
pub struct WebhookProcessor {
    tasks: TaskStore,
    audit: AuditLog,
    verifier: WebhookVerifier,
}

impl WebhookProcessor {
    pub fn new(tasks: TaskStore, audit: AuditLog, verifier: WebhookVerifier) -> Self {
        Self {
            tasks,
            audit,
            verifier,
        }
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Full delivery pipeline: audit, verify, apply, respond
    pub async fn handle(&self, request: &InboundRequest) -> WebhookResponse {
        let payload = audit_payload(request, self.verifier.max_body_bytes());

        let audit_id = match self
            .audit
            .create_pending(&payload, request.source_address.as_deref())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Could not record webhook delivery");
                return WebhookResponse::internal_error();
            }
        };

        let event = match self.verifier.verify_request(request) {
            Ok(event) => event,
            Err(rejection) => {
                warn!(
                    audit_id = %audit_id,
                    source = request.source_address.as_deref().unwrap_or("-"),
                    reason = %rejection,
                    "Webhook rejected"
                );
                self.finish_error(audit_id, &rejection.to_string()).await;
                return WebhookResponse::rejected(rejection.status_code());
            }
        };

        if self.process(audit_id, &event).await.is_failure() {
            WebhookResponse::internal_error()
        } else {
            WebhookResponse::accepted()
        }
    }

    /// Apply a verified event and drive its audit entry to a terminal state
    pub async fn process(&self, audit_id: Uuid, event: &VerifiedEvent) -> ProcessingOutcome {
        let event_type = event.event_type();

        match self
            .audit
            .mark_processing(audit_id, event_type, event.job_id())
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(audit_id = %audit_id, "Audit entry was not pending"),
            Err(e) => {
                let detail = format!("could not mark processing: {}", e);
                error!(audit_id = %audit_id, error = %e, "Audit log unavailable");
                self.finish_error(audit_id, &detail).await;
                return ProcessingOutcome::Failed { detail };
            }
        }

        let applied = match event {
            VerifiedEvent::CreateJob(job) | VerifiedEvent::UpdateJob(job) => self
                .merge_job(job)
                .await
                .map(|()| ProcessingOutcome::Upserted { job_id: job.job_id }),
            VerifiedEvent::CreateTask { task_id, jobs }
            | VerifiedEvent::UpdateTask { task_id, jobs } => self
                .merge_task_jobs(jobs)
                .await
                .map(|()| ProcessingOutcome::TaskUpserted {
                    task_id: *task_id,
                    jobs: jobs.len(),
                }),
            VerifiedEvent::DeleteJob { job_id } => {
                self.tasks
                    .delete(*job_id)
                    .await
                    .map(|existed| ProcessingOutcome::Deleted {
                        job_id: *job_id,
                        existed,
                    })
            }
            VerifiedEvent::DeleteTask { task_id } => {
                self.tasks
                    .delete_by_task(*task_id)
                    .await
                    .map(|removed| ProcessingOutcome::TaskDeleted {
                        task_id: *task_id,
                        removed,
                    })
            }
            VerifiedEvent::Unknown { event } => Ok(ProcessingOutcome::Ignored {
                event: event.clone(),
            }),
        };

        match applied {
            Ok(outcome) => {
                if let Err(e) = self.audit.mark_success(audit_id).await {
                    let detail = format!("could not mark success: {}", e);
                    error!(audit_id = %audit_id, error = %e, "Could not mark webhook success");
                    self.finish_error(audit_id, &detail).await;
                    return ProcessingOutcome::Failed { detail };
                }
                match &outcome {
                    ProcessingOutcome::Ignored { event } => {
                        debug!(audit_id = %audit_id, event = %event, "Ignored webhook event")
                    }
                    _ => info!(audit_id = %audit_id, event_type = %event_type, ?outcome, "Webhook applied"),
                }
                outcome
            }
            Err(e) => {
                let detail = e.to_string();
                error!(audit_id = %audit_id, event_type = %event_type, error = %e, "Webhook apply failed");
                self.finish_error(audit_id, &detail).await;
                ProcessingOutcome::Failed { detail }
            }
        }
    }

    /// Event payloads are partial; only the fields they carry are written
    async fn merge_job(&self, job: &NormalizedJob) -> crate::Result<()> {
        self.tasks.merge(job, carried_fields(&job.raw_payload)).await
    }

    async fn merge_task_jobs(&self, jobs: &[NormalizedJob]) -> crate::Result<()> {
        for job in jobs {
            self.merge_job(job).await?;
        }
        Ok(())
    }

    async fn finish_error(&self, audit_id: Uuid, detail: &str) {
        if let Err(e) = self.audit.mark_error(audit_id, detail).await {
            error!(audit_id = %audit_id, error = %e, "Could not mark webhook error");
        }
    }
}

/// Body as stored in the audit log: parsed JSON when possible, else text
fn audit_payload(request: &InboundRequest, max_body_bytes: usize) -> Value {
    let length = request.body_len();
    if length > max_body_bytes {
        return Value::String(format!("<{} bytes omitted>", length));
    }
    serde_json::from_slice(&request.body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&request.body).into_owned()))
}
