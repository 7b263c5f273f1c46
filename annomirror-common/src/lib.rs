//! # Annotation Mirror Common Library
//!
//! Shared code for the annotation mirror services:
//! - Data model for mirrored jobs and webhook audit entries
//! - Normalization of remote job records into the canonical shape
//! - Task Mirror Store and Audit Log (SQLite via sqlx)
//! - Webhook verification and processing, independent of any HTTP framework
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod time;
pub mod webhook;

pub use error::{Error, Result};
pub use models::{
    AuditEntry, EventType, JobFields, JobFilter, NormalizedJob, ProcessingState, TaskRecord,
};
