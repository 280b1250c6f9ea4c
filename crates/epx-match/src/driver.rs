//! The match cycle driver.
//!
//! Per cycle: claim pending events, run the archival pass for truly new
//! events (plus anything an admin flagged for reprocess), then the prompt
//! pass for everything still standing. Archival always settles before the
//! same event's prompt pass; an archival failure parks the event as
//! `failed:<reason>` and skips its prompt pass for the cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use epx_catalog::AlertCatalog;
use epx_db::{
    fetch_events, store_archival_matches, store_prompt_matches, update_event_status, Event,
    EventFilter, EventOrder, NewXmatch,
};
use epx_schemas::QueryStatus;

use crate::filters::reject_red_stars;
use crate::plan::{archival_spec, build_xmatch, event_label, prompt_spec, MatchConfig};

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub new_events: usize,
    pub requeried: usize,
    pub failed: usize,
    pub prompt_rows: u64,
    pub archival_rows: u64,
}

pub struct Matcher {
    pool: PgPool,
    catalog: Arc<dyn AlertCatalog>,
    cfg: MatchConfig,
    interval: Duration,
}

impl Matcher {
    pub fn new(
        pool: PgPool,
        catalog: Arc<dyn AlertCatalog>,
        cfg: MatchConfig,
        interval_secs: f64,
    ) -> Self {
        Self {
            pool,
            catalog,
            cfg,
            interval: Duration::from_secs_f64(interval_secs.max(1.0)),
        }
    }

    /// Cycle loop. Tick failures are logged and retried next cycle; the
    /// loop only exits on cancellation, after the in-flight tick finishes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "matcher started");
        loop {
            match self.tick().await {
                Ok(stats) if stats.new_events + stats.requeried > 0 => {
                    info!(
                        new = stats.new_events,
                        requeried = stats.requeried,
                        failed = stats.failed,
                        prompt_rows = stats.prompt_rows,
                        archival_rows = stats.archival_rows,
                        "match cycle complete"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!("match cycle failed: {err:#}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("matcher shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One full cycle over the current pending/requery sets.
    pub async fn tick(&self) -> Result<CycleStats> {
        let (new_events, _) = fetch_events(
            &self.pool,
            &EventFilter {
                status: Some(QueryStatus::Pending),
                ..Default::default()
            },
            None,
            EventOrder::Id,
        )
        .await?;

        let (requery, _) = fetch_events(
            &self.pool,
            &EventFilter {
                can_reprocess: true,
                ..Default::default()
            },
            None,
            EventOrder::Id,
        )
        .await?;

        let mut stats = CycleStats {
            new_events: new_events.len(),
            requeried: requery.len(),
            ..Default::default()
        };

        if new_events.is_empty() && requery.is_empty() {
            debug!("no events to process");
            return Ok(stats);
        }
        info!(
            total = new_events.len() + requery.len(),
            requeried = requery.len(),
            "events to process"
        );

        for event in &new_events {
            update_event_status(&self.pool, event.id, &QueryStatus::Processing).await?;
        }

        let mut failed: HashSet<i64> = HashSet::new();

        // Archival pass: new events, plus admin-flagged reprocess (their
        // archival rows were wiped with the rest).
        let archival_targets: Vec<&Event> = new_events
            .iter()
            .chain(requery.iter().filter(|e| e.query_status == "reprocess"))
            .collect();
        self.archival_pass(&archival_targets, &mut failed, &mut stats)
            .await;

        let prompt_targets: Vec<&Event> = new_events
            .iter()
            .chain(requery.iter())
            .filter(|e| !failed.contains(&e.id))
            .collect();
        self.prompt_pass(&prompt_targets, &mut failed, &mut stats)
            .await;

        stats.failed = failed.len();
        Ok(stats)
    }

    async fn archival_pass(
        &self,
        targets: &[&Event],
        failed: &mut HashSet<i64>,
        stats: &mut CycleStats,
    ) {
        if targets.is_empty() {
            return;
        }
        let by_label: HashMap<String, &Event> =
            targets.iter().map(|e| (event_label(e), *e)).collect();
        let specs: Vec<_> = targets.iter().map(|e| archival_spec(e, &self.cfg)).collect();

        for outcome in self.catalog.archival_searches(&specs).await {
            let Some(event) = by_label.get(&outcome.event_name).copied() else {
                warn!(label = %outcome.event_name, "catalog answered for an unknown event label");
                continue;
            };
            match outcome.result {
                Ok(alerts) => {
                    let rows: Vec<NewXmatch> = reject_red_stars(alerts)
                        .iter()
                        .map(|a| build_xmatch(event, a, true))
                        .collect();
                    info!(
                        event = %event.name,
                        version = %event.version,
                        matches = rows.len(),
                        "archival matches"
                    );
                    if rows.is_empty() {
                        continue;
                    }
                    match store_archival_matches(&self.pool, event.id, &rows).await {
                        Ok(written) => stats.archival_rows += written,
                        Err(err) => self.mark_failed(event, failed, &format!("{err:#}")).await,
                    }
                }
                Err(err) => self.mark_failed(event, failed, &err.to_string()).await,
            }
        }
    }

    async fn prompt_pass(
        &self,
        targets: &[&Event],
        failed: &mut HashSet<i64>,
        stats: &mut CycleStats,
    ) {
        if targets.is_empty() {
            return;
        }
        let by_label: HashMap<String, &Event> =
            targets.iter().map(|e| (event_label(e), *e)).collect();
        let specs: Vec<_> = targets.iter().map(|e| prompt_spec(e, &self.cfg)).collect();

        for outcome in self.catalog.prompt_searches(&specs).await {
            let Some(event) = by_label.get(&outcome.event_name).copied() else {
                warn!(label = %outcome.event_name, "catalog answered for an unknown event label");
                continue;
            };
            match outcome.result {
                Ok(alerts) => {
                    let rows: Vec<NewXmatch> = reject_red_stars(alerts)
                        .iter()
                        .map(|a| build_xmatch(event, a, false))
                        .collect();
                    info!(
                        event = %event.name,
                        version = %event.version,
                        matches = rows.len(),
                        "prompt matches"
                    );

                    // An empty result does not wipe previously found rows:
                    // the catalog is append-only, so a shrinking answer is a
                    // transient, not a retraction.
                    let result = if rows.is_empty() {
                        update_event_status(&self.pool, event.id, &QueryStatus::Done).await
                    } else {
                        store_prompt_matches(&self.pool, event.id, &rows)
                            .await
                            .map(|written| stats.prompt_rows += written)
                    };
                    if let Err(err) = result {
                        self.mark_failed(event, failed, &format!("{err:#}")).await;
                    }
                }
                Err(err) => self.mark_failed(event, failed, &err.to_string()).await,
            }
        }
    }

    async fn mark_failed(&self, event: &Event, failed: &mut HashSet<i64>, reason: &str) {
        warn!(event = %event.name, version = %event.version, "event failed: {reason}");
        failed.insert(event.id);
        if let Err(err) =
            update_event_status(&self.pool, event.id, &QueryStatus::Failed(reason.to_string()))
                .await
        {
            warn!(event_id = event.id, "could not record failure: {err:#}");
        }
    }
}
