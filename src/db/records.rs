use anyhow::{Context, Result};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tracing::instrument;

use super::Pool;
use crate::model::{Destination, ProductRecord};

/// Seven binds per row.
const RECORD_CHUNK: usize = 500;
const ID_CHUNK: usize = 900;

/// Create-or-replace `records` by id. On conflict every non-key column takes
/// the new value.
#[instrument(skip_all, fields(records = records.len(), table = destination.table()))]
pub async fn upsert(pool: &Pool, records: &[ProductRecord], destination: Destination) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    upsert_tx(&mut tx, records, destination).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn upsert_tx(
    tx: &mut Transaction<'_, Sqlite>,
    records: &[ProductRecord],
    destination: Destination,
) -> Result<()> {
    for chunk in records.chunks(RECORD_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} (id, name, url_key, price, description, image_url, missing_fields) ",
            destination.table()
        ));
        qb.push_values(chunk, |mut row, r| {
            row.push_bind(r.id)
                .push_bind(r.name.clone())
                .push_bind(r.url_key.clone())
                .push_bind(r.price)
                .push_bind(r.description.clone())
                .push_bind(r.image_url.clone())
                .push_bind(r.missing_fields.clone());
        });
        qb.push(
            " ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, \
             url_key = excluded.url_key, \
             price = excluded.price, \
             description = excluded.description, \
             image_url = excluded.image_url, \
             missing_fields = excluded.missing_fields",
        );
        qb.build()
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to upsert into {}", destination.table()))?;
    }
    Ok(())
}

/// Drop error rows for ids that have since been crawled successfully.
pub async fn discard_errors_tx(tx: &mut Transaction<'_, Sqlite>, ids: &[i64]) -> Result<u64> {
    let mut removed = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM product_errors WHERE id IN (");
        let mut list = qb.separated(", ");
        for id in chunk {
            list.push_bind(*id);
        }
        list.push_unseparated(")");
        removed += qb.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(removed)
}

pub async fn get_record(
    pool: &Pool,
    id: i64,
    destination: Destination,
) -> Result<Option<ProductRecord>> {
    let sql = format!(
        "SELECT id, name, url_key, price, description, image_url, missing_fields FROM {} WHERE id = ?",
        destination.table()
    );
    let record = sqlx::query_as::<_, ProductRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

pub async fn count(pool: &Pool, destination: Destination) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", destination.table());
    let n: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(n)
}
