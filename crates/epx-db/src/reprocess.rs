//! Admin reprocess actions.
//!
//! Bulk reprocess wipes every cross-match and flags every event for a fresh
//! archival + prompt pass. Both actions take the matcher advisory lock so
//! the wipe cannot interleave with an in-flight per-event commit.

use anyhow::{Context, Result};
use epx_schemas::QueryStatus;
use sqlx::PgPool;

use crate::xmatches::delete_xmatches_for_event;
use crate::{take_matcher_lock, update_event_status};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReprocessSummary {
    pub events_flagged: u64,
    pub xmatches_deleted: u64,
}

/// Flip every event to `reprocess` and clear all cross-matches.
pub async fn reprocess_all(pool: &PgPool) -> Result<ReprocessSummary> {
    let mut tx = pool.begin().await.context("begin reprocess_all")?;
    take_matcher_lock(&mut tx).await?;

    let deleted = sqlx::query("delete from xmatches")
        .execute(&mut *tx)
        .await
        .context("clear xmatches failed")?
        .rows_affected();

    let flagged = sqlx::query(
        "update events set query_status = 'reprocess', updated_at = now() \
         where query_status <> 'reprocess'",
    )
    .execute(&mut *tx)
    .await
    .context("flag events for reprocess failed")?
    .rows_affected();

    tx.commit().await.context("commit reprocess_all")?;
    Ok(ReprocessSummary {
        events_flagged: flagged,
        xmatches_deleted: deleted,
    })
}

/// Reprocess a single event: drop its rows (optionally keeping archival
/// ones) and flag it for both passes.
pub async fn reprocess_event(pool: &PgPool, event_id: i64, keep_archival: bool) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin reprocess_event")?;
    take_matcher_lock(&mut tx).await?;

    let deleted = delete_xmatches_for_event(&mut *tx, event_id, keep_archival).await?;
    update_event_status(&mut *tx, event_id, &QueryStatus::Reprocess).await?;

    tx.commit().await.context("commit reprocess_event")?;
    Ok(deleted)
}
