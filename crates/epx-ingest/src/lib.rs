//! epx-ingest
//!
//! Polls the upstream feed, validates each batch against the column
//! allow-list, and inserts new event versions as `pending`. Missed cycles
//! are never back-filled; the next poll sees whatever the feed returns.

pub mod validate;

use std::time::Duration;

use anyhow::{Context, Result};
use epx_db::DuplicatePolicy;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use epx_upstream::EventProvider;

/// Outcome of one poll cycle.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub cycle_id: Uuid,
    pub fetched: usize,
    pub inserted: u64,
    pub skipped: u64,
}

pub struct Ingester {
    pool: PgPool,
    provider: Box<dyn EventProvider>,
    poll_interval: Duration,
}

impl Ingester {
    pub fn new(pool: PgPool, provider: Box<dyn EventProvider>, poll_interval_secs: f64) -> Self {
        Self {
            pool,
            provider,
            poll_interval: Duration::from_secs_f64(poll_interval_secs.max(1.0)),
        }
    }

    /// Poll loop. Cycle failures are logged and retried next cycle; the
    /// loop only exits on cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            source = self.provider.source_name(),
            interval_secs = self.poll_interval.as_secs(),
            "ingester started"
        );
        loop {
            match self.cycle().await {
                Ok(report) => {
                    if report.fetched > 0 {
                        info!(
                            cycle = %report.cycle_id,
                            fetched = report.fetched,
                            inserted = report.inserted,
                            skipped = report.skipped,
                            "ingest cycle complete"
                        );
                    }
                }
                Err(err) => warn!("ingest cycle failed: {err:#}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("ingester shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One poll: fetch, validate, insert (duplicates skipped).
    pub async fn cycle(&self) -> Result<IngestReport> {
        let cycle_id = Uuid::new_v4();

        let records = self
            .provider
            .fetch_candidates()
            .await
            .context("fetch upstream candidates")?;

        let batch = validate::candidates_to_events(&records)?;

        let summary = if batch.is_empty() {
            Default::default()
        } else {
            epx_db::insert_events(&self.pool, &batch, DuplicatePolicy::Skip)
                .await
                .context("insert ingested events")?
        };

        Ok(IngestReport {
            cycle_id,
            fetched: records.len(),
            inserted: summary.inserted,
            skipped: summary.skipped,
        })
    }
}
