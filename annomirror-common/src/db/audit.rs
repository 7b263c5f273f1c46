//! Audit Log: append-only record of webhook deliveries
//!
//! Each delivery gets its own row keyed by a fresh UUID, so concurrent
//! deliveries never contend on a shared counter. A row is written once as
//! `pending` and updated once more to a terminal state; the `WHERE` clauses
//! on the transitions make a state regression a no-op.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{AuditEntry, EventType, ProcessingState};
use crate::time::{now, parse_db_string, to_db_string};
use crate::{Error, Result};

const AUDIT_COLUMNS: &str = "guid, event_type, job_id, processing_state, payload, \
     source_address, error_detail, received_at, processed_at";

/// Filters for the operations log view
#[derive(Debug, Clone, Default)]
pub struct AuditListFilter {
    pub state: Option<ProcessingState>,
    pub event_type: Option<EventType>,
}

/// Handle to the webhook_log table
#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a delivery as soon as it is received
    pub async fn create_pending(
        &self,
        payload: &Value,
        source_address: Option<&str>,
    ) -> Result<Uuid> {
        let guid = Uuid::new_v4();
        let payload = serde_json::to_string(payload)
            .map_err(|e| Error::InvalidInput(format!("payload not serializable: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO webhook_log (guid, event_type, processing_state, payload, source_address, received_at)
            VALUES (?, 'unknown', 'pending', ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(payload)
        .bind(source_address)
        .bind(to_db_string(&now()))
        .execute(&self.pool)
        .await?;

        Ok(guid)
    }

    /// pending → processing
    ///
    /// Returns `false` if the entry was not pending.
    pub async fn mark_processing(
        &self,
        id: Uuid,
        event_type: EventType,
        job_id: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_log
            SET processing_state = 'processing', event_type = ?, job_id = ?
            WHERE guid = ? AND processing_state = 'pending'
            "#,
        )
        .bind(event_type.as_str())
        .bind(job_id)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// processing → success
    pub async fn mark_success(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_log
            SET processing_state = 'success', processed_at = ?, error_detail = NULL
            WHERE guid = ? AND processing_state = 'processing'
            "#,
        )
        .bind(to_db_string(&now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// pending | processing → error
    pub async fn mark_error(&self, id: Uuid, detail: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_log
            SET processing_state = 'error', processed_at = ?, error_detail = ?
            WHERE guid = ? AND processing_state IN ('pending', 'processing')
            "#,
        )
        .bind(to_db_string(&now()))
        .bind(detail)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<AuditEntry>> {
        let sql = format!("SELECT {} FROM webhook_log WHERE guid = ?", AUDIT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn count(&self, filter: &AuditListFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM webhook_log WHERE 1 = 1");
        push_audit_filter(&mut qb, filter);
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Newest first
    pub async fn list(
        &self,
        filter: &AuditListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM webhook_log WHERE 1 = 1",
            AUDIT_COLUMNS
        ));
        push_audit_filter(&mut qb, filter);
        qb.push(" ORDER BY received_at DESC, guid ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Entry counts per processing state
    pub async fn count_by_state(&self) -> Result<Vec<(ProcessingState, i64)>> {
        let rows = sqlx::query(
            "SELECT processing_state, COUNT(*) AS n FROM webhook_log \
             GROUP BY processing_state ORDER BY processing_state",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(ProcessingState, i64)> {
                let state: String = row.try_get("processing_state")?;
                Ok((parse_state(&state)?, row.try_get("n")?))
            })
            .collect()
    }
}

fn push_audit_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditListFilter) {
    if let Some(state) = filter.state {
        qb.push(" AND processing_state = ").push_bind(state.as_str());
    }
    if let Some(event_type) = filter.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.as_str());
    }
}

fn parse_state(value: &str) -> Result<ProcessingState> {
    ProcessingState::parse(value)
        .ok_or_else(|| Error::CorruptRow(format!("unknown processing_state '{}'", value)))
}

fn entry_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let guid: String = row.try_get("guid")?;
    let id = Uuid::parse_str(&guid)
        .map_err(|e| Error::CorruptRow(format!("invalid guid '{}': {}", guid, e)))?;

    let event_type: String = row.try_get("event_type")?;
    let state: String = row.try_get("processing_state")?;

    let payload: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload)
        .map_err(|e| Error::CorruptRow(format!("payload is not JSON: {}", e)))?;

    let received_at: String = row.try_get("received_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;

    Ok(AuditEntry {
        id,
        event_type: EventType::from_event_name(&event_type),
        job_id: row.try_get("job_id")?,
        processing_state: parse_state(&state)?,
        payload,
        source_address: row.try_get("source_address")?,
        error_detail: row.try_get("error_detail")?,
        received_at: parse_db_string(&received_at)?,
        processed_at: processed_at.as_deref().map(parse_db_string).transpose()?,
    })
}
