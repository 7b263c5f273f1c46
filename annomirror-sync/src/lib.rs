//! annomirror-sync library - pull-side reconciliation
//!
//! Pages through the remote job listing and folds every job into the Task
//! Mirror Store. Used by the `annomirror-sync` binary and by the web
//! service's `POST /api/sync` endpoint.

pub mod engine;
pub mod remote;

pub use engine::{SyncAborted, SyncEngine, SyncSummary};
pub use remote::{JobSource, JobStream, RemoteClient, RemoteError, RemoteJob};
