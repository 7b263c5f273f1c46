//! Remote annotation platform access

mod client;

pub use client::RemoteClient;

use annomirror_common::{JobFilter, NormalizedJob};
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Remote client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport failure, timeout, rejected login or a failed listing page.
    /// Ends the stream.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// One job could not be read; the stream continues with the next
    #[error("malformed remote record: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// One listed job that passed the filter
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteJob {
    /// Read in full, including per-job lookups
    Fetched(NormalizedJob),
    /// In the caller's known set; no per-job request was made
    Known { job_id: i64 },
}

impl RemoteJob {
    pub fn job_id(&self) -> i64 {
        match self {
            RemoteJob::Fetched(job) => job.job_id,
            RemoteJob::Known { job_id } => *job_id,
        }
    }
}

/// Finite, non-restartable stream of listed jobs
pub type JobStream<'a> = BoxStream<'a, Result<RemoteJob, RemoteError>>;

/// Anything that can list remote jobs under a filter
pub trait JobSource: Send + Sync {
    /// Jobs whose id is in `known` come back as [`RemoteJob::Known`]
    fn fetch_jobs<'a>(&'a self, filter: &'a JobFilter, known: &'a HashSet<i64>) -> JobStream<'a>;
}

impl<T: JobSource + ?Sized> JobSource for Arc<T> {
    fn fetch_jobs<'a>(&'a self, filter: &'a JobFilter, known: &'a HashSet<i64>) -> JobStream<'a> {
        (**self).fetch_jobs(filter, known)
    }
}
