//! Database initialization
//!
//! Opens (creating if needed) the SQLite file and makes sure both tables and
//! their indexes exist. Safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL + busy timeout apply to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Idempotent - safe to call multiple times
    create_tasks_table(&pool).await?;
    create_webhook_log_table(&pool).await?;

    Ok(pool)
}

/// Create the tasks table (Mirror Store)
///
/// `job_id` is the primary key, so a second row for the same remote job
/// cannot exist.
pub async fn create_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            job_id INTEGER PRIMARY KEY,
            task_id INTEGER NOT NULL,
            task_name TEXT,
            project_id INTEGER,
            project_name TEXT,
            assignee TEXT,
            status TEXT,
            stage TEXT,
            state TEXT,
            manual_annotation_count INTEGER NOT NULL DEFAULT 0 CHECK (manual_annotation_count >= 0),
            interpolated_annotation_count INTEGER NOT NULL DEFAULT 0 CHECK (interpolated_annotation_count >= 0),
            total_annotation_count INTEGER NOT NULL DEFAULT 0 CHECK (total_annotation_count >= 0),
            remote_url TEXT NOT NULL,
            raw_payload TEXT NOT NULL,
            last_synced_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_tasks_task_id ON tasks(task_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}

/// Create the webhook_log table (Audit Log)
///
/// No foreign key to `tasks`: an entry keeps its job id after the task row is
/// deleted.
pub async fn create_webhook_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_log (
            guid TEXT PRIMARY KEY,
            event_type TEXT NOT NULL DEFAULT 'unknown',
            job_id INTEGER,
            processing_state TEXT NOT NULL DEFAULT 'pending'
                CHECK (processing_state IN ('pending', 'processing', 'success', 'error')),
            payload TEXT NOT NULL,
            source_address TEXT,
            error_detail TEXT,
            received_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_webhook_log_event_type ON webhook_log(event_type)",
        "CREATE INDEX IF NOT EXISTS idx_webhook_log_state ON webhook_log(processing_state)",
        "CREATE INDEX IF NOT EXISTS idx_webhook_log_received_at ON webhook_log(received_at DESC)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
