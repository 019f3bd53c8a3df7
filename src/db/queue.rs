use anyhow::{anyhow, Result};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use tracing::instrument;

use super::model::{QueueCounts, WorkItem};
use super::Pool;
use crate::model::QueueStatus;

/// Ids per statement; keeps well below SQLite's bound-parameter limit.
const ID_CHUNK: usize = 900;

/// Insert every id as `pending` unless it is already queued. Returns the number
/// of newly queued ids.
#[instrument(skip_all, fields(ids = ids.len()))]
pub async fn initialize(pool: &Pool, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO work_queue (id, status) ");
        qb.push_values(chunk, |mut row, id| {
            row.push_bind(*id).push_bind(QueueStatus::Pending.as_str());
        });
        qb.push(" ON CONFLICT(id) DO NOTHING");
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

/// Ids still to crawl: `pending` plus `error` (retried every run), by id.
#[instrument(skip_all)]
pub async fn select_outstanding(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM work_queue WHERE status IN ('pending', 'error') ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Move `ids` to `status` in one transaction. See [`mark_status_tx`].
#[instrument(skip_all, fields(ids = ids.len(), status = status.as_str()))]
pub async fn mark_status(
    pool: &Pool,
    ids: &[i64],
    status: QueueStatus,
    error_message: Option<&str>,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let updated = mark_status_tx(&mut tx, ids, status, error_message).await?;
    tx.commit().await?;
    Ok(updated)
}

/// `last_error` is only kept for `error`; other statuses clear it. Rows already
/// `done` never leave that state.
pub async fn mark_status_tx(
    tx: &mut Transaction<'_, Sqlite>,
    ids: &[i64],
    status: QueueStatus,
    error_message: Option<&str>,
) -> Result<u64> {
    let last_error = match status {
        QueueStatus::Error => error_message.map(str::to_string),
        _ => None,
    };
    let mut updated = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE work_queue SET status = ");
        qb.push_bind(status.as_str());
        qb.push(", last_error = ");
        qb.push_bind(last_error.clone());
        qb.push(", updated_at = CURRENT_TIMESTAMP WHERE status != 'done' AND id IN (");
        let mut list = qb.separated(", ");
        for id in chunk {
            list.push_bind(*id);
        }
        list.push_unseparated(")");
        updated += qb.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(updated)
}

#[instrument(skip_all)]
pub async fn status_counts(pool: &Pool) -> Result<QueueCounts> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM work_queue GROUP BY status")
            .fetch_all(pool)
            .await?;
    let mut counts = QueueCounts::default();
    for (status, n) in rows {
        match QueueStatus::parse_status(&status) {
            Some(QueueStatus::Pending) => counts.pending = n,
            Some(QueueStatus::Done) => counts.done = n,
            Some(QueueStatus::Error) => counts.error = n,
            None => return Err(anyhow!("work_queue has unknown status {}", status)),
        }
    }
    Ok(counts)
}

pub async fn get_item(pool: &Pool, id: i64) -> Result<Option<WorkItem>> {
    let row = sqlx::query("SELECT id, status, last_error, updated_at FROM work_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|row| item_from_row(&row)).transpose()
}

/// Most recently failed items first.
#[instrument(skip_all)]
pub async fn list_errors(pool: &Pool, limit: i64) -> Result<Vec<WorkItem>> {
    let rows = sqlx::query(
        "SELECT id, status, last_error, updated_at FROM work_queue WHERE status = 'error' \
         ORDER BY updated_at DESC, id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(item_from_row).collect()
}

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkItem> {
    let id: i64 = row.get("id");
    let status_str: String = row.get("status");
    let status = QueueStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("queue item {} has unknown status {}", id, status_str))?;
    Ok(WorkItem {
        id,
        status,
        last_error: row.try_get::<Option<String>, _>("last_error").ok().flatten(),
        updated_at: row.try_get("updated_at")?,
    })
}
