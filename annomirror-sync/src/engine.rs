//! Sync Engine: reconcile remote jobs into the Task Mirror Store
//!
//! Per job:
//! - not mirrored yet → insert, `created`
//! - mirrored, not forced → untouched, `skipped`; the source is handed the
//!   mirrored ids up front, so these jobs cost no per-job remote request
//! - mirrored, forced → every mutable field overwritten, `updated`
//! - unreadable record or store failure → `failed`, run continues
//!
//! An unavailable remote stops the run; the counts so far are returned with
//! the cause. No transaction spans jobs.

use annomirror_common::db::TaskStore;
use annomirror_common::{JobFilter, NormalizedJob};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::remote::{JobSource, RemoteError, RemoteJob};

/// Per-outcome job counts for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SyncSummary {
    pub fn processed(&self) -> u64 {
        self.created + self.updated + self.skipped + self.failed
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={}, updated={}, skipped={}, failed={}",
            self.created, self.updated, self.skipped, self.failed
        )
    }
}

/// Run stopped early because the remote became unavailable
#[derive(Debug, Clone, Error)]
#[error("sync aborted after {} jobs: {cause}", .summary.processed())]
pub struct SyncAborted {
    pub summary: SyncSummary,
    #[source]
    pub cause: RemoteError,
}

enum Applied {
    Created,
    Updated,
    Skipped,
}

/// Pull-side reconciler
#[derive(Clone)]
pub struct SyncEngine {
    source: Arc<dyn JobSource>,
    store: TaskStore,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn JobSource>, store: TaskStore) -> Self {
        Self { source, store }
    }

    pub async fn run(&self, filter: &JobFilter, force: bool) -> Result<SyncSummary, SyncAborted> {
        info!(filter = %filter, force, "Starting sync");

        let known = if force {
            HashSet::new()
        } else {
            // Without the snapshot every job is read in full; insert_if_absent still skips
            self.store.mirrored_job_ids().await.unwrap_or_else(|e| {
                warn!(error = %e, "Could not load mirrored job ids");
                HashSet::new()
            })
        };

        let mut summary = SyncSummary::default();
        let mut jobs = self.source.fetch_jobs(filter, &known);

        while let Some(item) = jobs.next().await {
            let job = match item {
                Ok(RemoteJob::Fetched(job)) => job,
                Ok(RemoteJob::Known { job_id }) => {
                    debug!(job_id, "Task already mirrored, skipping");
                    summary.skipped += 1;
                    continue;
                }
                Err(cause @ RemoteError::Unavailable(_)) => {
                    warn!(error = %cause, %summary, "Remote unavailable, aborting sync");
                    return Err(SyncAborted { summary, cause });
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable remote job");
                    summary.failed += 1;
                    continue;
                }
            };

            match self.apply(&job, force).await {
                Ok(Applied::Created) => summary.created += 1,
                Ok(Applied::Updated) => summary.updated += 1,
                Ok(Applied::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!(job_id = job.job_id, error = %e, "Failed to store job");
                    summary.failed += 1;
                }
            }
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "Sync complete"
        );
        Ok(summary)
    }

    /// A row inserted concurrently by another writer counts as already present
    async fn apply(&self, job: &NormalizedJob, force: bool) -> annomirror_common::Result<Applied> {
        if self.store.insert_if_absent(job).await? {
            debug!(job_id = job.job_id, "Created task");
            return Ok(Applied::Created);
        }

        if !force {
            debug!(job_id = job.job_id, "Task already mirrored, skipping");
            return Ok(Applied::Skipped);
        }

        self.store.upsert(job).await?;
        debug!(job_id = job.job_id, "Updated task");
        Ok(Applied::Updated)
    }
}
