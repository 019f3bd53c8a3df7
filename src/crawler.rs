//! Drains the work queue batch by batch.
//!
//! Each batch fans out over a `JoinSet` gated by a semaphore, then commits all
//! of its writes and status changes in one transaction. Batch N+1 starts only
//! after batch N has committed, so an interrupted run loses at most the batch
//! in flight, and those ids are still `pending`/`error` on the next run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::CrawlSettings;
use crate::db::{queue, records, Pool};
use crate::fetch::{FetchOutcome, Fetched, ProductSource};
use crate::model::{Destination, FailureReason, ProductRecord, QueueStatus};
use crate::normalize::normalize;

const PROGRESS_EVERY: usize = 1000;

/// Where one fetched id ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Product(ProductRecord),
    Failure(ProductRecord, FailureReason),
}

pub fn route(fetched: Fetched) -> Route {
    match fetched.outcome {
        FetchOutcome::Success(payload) => {
            let normalized = normalize(fetched.id, &payload);
            if normalized.fully_empty {
                Route::Failure(ProductRecord::failed(fetched.id), FailureReason::EmptyPayload)
            } else {
                Route::Product(normalized.record)
            }
        }
        FetchOutcome::NotFound => {
            Route::Failure(ProductRecord::failed(fetched.id), FailureReason::NotFound)
        }
        FetchOutcome::Exhausted(exhaustion) => {
            Route::Failure(ProductRecord::failed(fetched.id), exhaustion.into())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub index: usize,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
    pub size: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Fetch tasks that died; their ids keep their previous status.
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub newly_queued: u64,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batches: Vec<BatchSummary>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        writeln!(f, "========== Crawl Summary ==========")?;
        writeln!(f, "Run:                     {}", self.run_id)?;
        writeln!(f, "Batches:                 {}", self.batches.len())?;
        writeln!(f, "Total Records Processed: {}", self.processed)?;
        writeln!(f, "Completed:               {}", self.succeeded)?;
        writeln!(f, "Errors:                  {}", self.failed)?;
        if self.skipped > 0 {
            writeln!(f, "Left for next run:       {}", self.skipped)?;
        }
        writeln!(f, "Elapsed:                 {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)?;
        write!(f, "===================================")
    }
}

pub struct Crawler {
    pool: Pool,
    source: Arc<dyn ProductSource>,
    settings: CrawlSettings,
    gate: Arc<Semaphore>,
}

impl Crawler {
    pub fn new(pool: Pool, source: Arc<dyn ProductSource>, settings: CrawlSettings) -> Self {
        let gate = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            pool,
            source,
            settings,
            gate,
        }
    }

    /// Queue `ids` (already-known ids are left alone) and crawl everything
    /// outstanding. Pass an empty slice to only resume.
    #[instrument(skip_all, fields(input = ids.len()))]
    pub async fn run(&self, ids: &[i64]) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let newly_queued = queue::initialize(&self.pool, ids)
            .await
            .context("failed to initialize work queue")?;
        let outstanding = queue::select_outstanding(&self.pool)
            .await
            .context("failed to read outstanding ids")?;
        let batch_size = self.settings.batch_size.max(1);
        let total_batches = outstanding.len().div_ceil(batch_size);
        info!(
            %run_id,
            newly_queued,
            outstanding = outstanding.len(),
            batches = total_batches,
            "starting crawl"
        );

        let mut batches = Vec::with_capacity(total_batches);
        for (index, batch) in outstanding.chunks(batch_size).enumerate() {
            info!(batch = index + 1, of = total_batches, size = batch.len(), "processing batch");
            let summary = self.process_batch(index, batch).await?;
            info!(
                batch = index + 1,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "batch committed"
            );
            batches.push(summary);
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            newly_queued,
            processed: outstanding.len(),
            succeeded: batches.iter().map(|b| b.succeeded).sum(),
            failed: batches.iter().map(|b| b.failed).sum(),
            skipped: batches.iter().map(|b| b.skipped).sum(),
            batches,
        };
        info!(
            %run_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "crawl finished"
        );
        Ok(summary)
    }

    async fn process_batch(&self, index: usize, batch: &[i64]) -> Result<BatchSummary> {
        let mut tasks = JoinSet::new();
        for &id in batch {
            let source = Arc::clone(&self.source);
            let gate = Arc::clone(&self.gate);
            tasks.spawn(async move {
                // never closed, so the permit is always granted
                let _permit = gate.acquire_owned().await.ok();
                source.fetch(id).await
            });
        }

        let mut products = Vec::new();
        let mut failures = Vec::new();
        let mut skipped = 0;
        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok(fetched) => match route(fetched) {
                    Route::Product(record) => products.push(record),
                    Route::Failure(record, reason) => {
                        debug!(id = record.id, %reason, "routing to error storage");
                        failures.push((record, reason));
                    }
                },
                Err(err) => {
                    skipped += 1;
                    error!(batch = index + 1, ?err, "fetch task failed; id left for the next run");
                }
            }
            if completed % PROGRESS_EVERY == 0 {
                info!(batch = index + 1, completed, of = batch.len(), "batch progress");
            }
        }

        self.commit_batch(&products, &failures)
            .await
            .with_context(|| format!("failed to commit batch {}", index + 1))?;

        Ok(BatchSummary {
            index,
            first_id: batch.first().copied(),
            last_id: batch.last().copied(),
            size: batch.len(),
            succeeded: products.len(),
            failed: failures.len(),
            skipped,
        })
    }

    /// Records first, statuses last, all in one transaction: either the whole
    /// batch is recorded or none of it is.
    async fn commit_batch(
        &self,
        products: &[ProductRecord],
        failures: &[(ProductRecord, FailureReason)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        records::upsert_tx(&mut tx, products, Destination::Products).await?;
        let error_rows: Vec<ProductRecord> = failures.iter().map(|(r, _)| r.clone()).collect();
        records::upsert_tx(&mut tx, &error_rows, Destination::Errors).await?;

        let done_ids: Vec<i64> = products.iter().map(|r| r.id).collect();
        records::discard_errors_tx(&mut tx, &done_ids).await?;
        queue::mark_status_tx(&mut tx, &done_ids, QueueStatus::Done, None).await?;

        let mut by_reason: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for (record, reason) in failures {
            by_reason.entry(reason.to_string()).or_default().push(record.id);
        }
        for (reason, ids) in &by_reason {
            queue::mark_status_tx(&mut tx, ids, QueueStatus::Error, Some(reason.as_str())).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
