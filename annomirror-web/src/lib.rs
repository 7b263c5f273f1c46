//! annomirror-web library - webhook receiver and read-only JSON API
//!
//! `/webhook` is the only write path from the outside; everything under
//! `/api` reads the mirror, except `POST /api/sync` which triggers a pull.

use std::sync::Arc;

use annomirror_common::db::{AuditLog, TaskStore};
use annomirror_common::webhook::{WebhookProcessor, WebhookVerifier};
use annomirror_sync::{JobSource, SyncEngine};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod pagination;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskStore,
    pub audit: AuditLog,
    pub webhook: Arc<WebhookProcessor>,
    pub sync: SyncEngine,
}

impl AppState {
    pub fn new(pool: SqlitePool, verifier: WebhookVerifier, source: Arc<dyn JobSource>) -> Self {
        let tasks = TaskStore::new(pool.clone());
        let audit = AuditLog::new(pool);
        let webhook = Arc::new(WebhookProcessor::new(tasks.clone(), audit.clone(), verifier));
        let sync = SyncEngine::new(source, tasks.clone());

        Self {
            tasks,
            audit,
            webhook,
            sync,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::extract::DefaultBodyLimit;
    use axum::routing::{get, post};

    // The webhook handler enforces its own size cap so oversized deliveries
    // still reach the audit log
    let webhook = Router::new()
        .route("/webhook", post(api::receive_webhook))
        .layer(DefaultBodyLimit::disable());

    let read_api = Router::new()
        .route("/api/tasks", get(api::list_tasks))
        .route("/api/tasks/:job_id", get(api::get_task))
        .route("/api/webhook-logs", get(api::list_webhook_logs))
        .route("/api/stats", get(api::get_stats))
        .route("/api/sync", post(api::trigger_sync));

    Router::new()
        .merge(webhook)
        .merge(read_api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
