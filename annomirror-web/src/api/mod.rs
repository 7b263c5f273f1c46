//! HTTP API handlers for annomirror-web

pub mod audit;
pub mod health;
pub mod stats;
pub mod sync;
pub mod tasks;
pub mod webhook;

pub use audit::list_webhook_logs;
pub use health::health_routes;
pub use stats::get_stats;
pub use sync::trigger_sync;
pub use tasks::{get_task, list_tasks};
pub use webhook::receive_webhook;
