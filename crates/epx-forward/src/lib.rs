//! epx-forward
//!
//! Ships unshipped prompt matches to the downstream broker: candidate post,
//! one-off photometry import for newly posted objects, annotation merge,
//! then the shipped flag. Each candidate settles completely before the
//! next; a failure skips that row and continues, and the row comes back on
//! a later cycle because its flag never flipped.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use epx_broker::{
    round2, AlertToPost, EventAnnotation, PostCandidateOutcome, SkyPortalClient,
};
use epx_db::{
    fetch_event_by_id, fetch_xmatches, mark_xmatch_shipped, shipped_later_exists, Xmatch,
    XmatchFilter,
};
use epx_schemas::time::jd_from_utc;

/// Alerts detected more than this many days ago are never shipped.
const DETECTION_LOOKBACK_DAYS: f64 = 62.0;

/// Only rows created within the last day are considered per cycle.
const CREATED_LOOKBACK_HOURS: i64 = 24;

/// Pause between candidates, easing the broker's rate limiter.
const INTER_CANDIDATE_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ForwarderConfig {
    /// Events older than this many days are skipped, not shipped.
    pub max_event_age_days: f64,
    pub interval_secs: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardStats {
    pub considered: usize,
    pub shipped: usize,
    pub skipped_stale: usize,
    pub failed: usize,
}

enum Outcome {
    Shipped,
    SkippedStale,
}

pub struct Forwarder {
    pool: PgPool,
    broker: SkyPortalClient,
    import_group_id: i64,
    cfg: ForwarderConfig,
}

/// True when the event observation is older than the shipping gate.
fn event_is_stale(obs_start: DateTime<Utc>, now: DateTime<Utc>, max_age_days: f64) -> bool {
    let age_days = (now - obs_start).num_seconds() as f64 / 86_400.0;
    age_days > max_age_days
}

impl Forwarder {
    pub fn new(
        pool: PgPool,
        broker: SkyPortalClient,
        import_group_id: i64,
        cfg: ForwarderConfig,
    ) -> Self {
        Self {
            pool,
            broker,
            import_group_id,
            cfg,
        }
    }

    /// Shipping loop. Cycle errors are logged and retried next cycle; on
    /// cancellation the candidate in hand finishes before exit.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.cfg.interval_secs,
            max_event_age_days = self.cfg.max_event_age_days,
            "forwarder started"
        );
        let interval = Duration::from_secs_f64(self.cfg.interval_secs.max(1.0));
        loop {
            match self.tick(&cancel).await {
                Ok(stats) if stats.considered > 0 => info!(
                    considered = stats.considered,
                    shipped = stats.shipped,
                    skipped_stale = stats.skipped_stale,
                    failed = stats.failed,
                    "forward cycle complete"
                ),
                Ok(_) => {}
                Err(err) => warn!("forward cycle failed: {err:#}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("forwarder shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One cycle over the current unshipped set.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<ForwardStats> {
        let now = Utc::now();
        let filter = XmatchFilter {
            to_broker: Some(false),
            archival: Some(false),
            created_after: Some(now - ChronoDuration::hours(CREATED_LOOKBACK_HOURS)),
            detected_after: Some(jd_from_utc(now) - DETECTION_LOOKBACK_DAYS),
            event_age_days: Some(self.cfg.max_event_age_days),
            ..Default::default()
        };

        let (rows, total) = fetch_xmatches(&self.pool, &filter, None).await?;
        let mut stats = ForwardStats {
            considered: rows.len(),
            ..Default::default()
        };
        if rows.is_empty() {
            debug!("no xmatches to ship");
            return Ok(stats);
        }
        info!(total, "xmatches to ship");

        for row in &rows {
            if cancel.is_cancelled() {
                break;
            }
            match self.process(row).await {
                Ok(Outcome::Shipped) => {
                    stats.shipped += 1;
                    tokio::time::sleep(INTER_CANDIDATE_PAUSE).await;
                }
                Ok(Outcome::SkippedStale) => stats.skipped_stale += 1,
                Err(err) => {
                    warn!(
                        object_id = %row.object_id,
                        candid = row.candid,
                        "error shipping xmatch: {err:#}"
                    );
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn process(&self, row: &Xmatch) -> Result<Outcome> {
        let event = fetch_event_by_id(&self.pool, row.event_id)
            .await?
            .ok_or_else(|| anyhow!("event id={} not found for xmatch", row.event_id))?;

        if event_is_stale(event.obs_start, Utc::now(), self.cfg.max_event_age_days) {
            debug!(
                event = %event.name,
                "event observed more than {} days ago, skipping",
                self.cfg.max_event_age_days
            );
            return Ok(Outcome::SkippedStale);
        }

        let alert = AlertToPost {
            object_id: row.object_id.clone(),
            candid: row.candid,
            jd: row.jd,
            ra: row.ra,
            dec: row.dec,
            drb: row.drb,
        };
        let outcome = self
            .broker
            .post_candidate(&alert)
            .await
            .context("post candidate")?;

        // Photometry import is a one-off per object: only for a newly
        // posted candidate with no later shipped alert of the same object.
        if outcome == PostCandidateOutcome::Posted
            && !shipped_later_exists(&self.pool, &row.object_id, row.jd).await?
        {
            self.broker
                .import_alert(&row.object_id, row.candid, self.import_group_id)
                .await
                .context("import alert photometry")?;
        }

        let entry = EventAnnotation {
            name: event.name.clone(),
            delta_t: Some(round2(row.delta_t)),
            distance_arcmin: Some(round2(row.distance_arcmin)),
        };
        self.broker
            .upsert_annotation(&row.object_id, entry)
            .await
            .context("upsert annotation")?;

        mark_xmatch_shipped(&self.pool, row.id).await?;
        info!(object_id = %row.object_id, candid = row.candid, "xmatch shipped");
        Ok(Outcome::Shipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stale_gate_is_in_days() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let fresh = now - ChronoDuration::days(30);
        let stale = now - ChronoDuration::days(32);
        assert!(!event_is_stale(fresh, now, 31.0));
        assert!(event_is_stale(stale, now, 31.0));
    }

    #[test]
    fn stale_gate_boundary_is_exclusive() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let exactly = now - ChronoDuration::days(31);
        assert!(!event_is_stale(exactly, now, 31.0));
    }
}
