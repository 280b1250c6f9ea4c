//! Event store operations.
//!
//! Version tags are validated before anything hits the wire and always
//! compared as integers in SQL (`v9 < v10`), never as text.

use anyhow::{anyhow, bail, Context, Result};
use epx_schemas::{parse_version_tag, QueryStatus};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::{Event, NewEvent};
use crate::Page;

/// What to do when an insert collides on `(name, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    Skip,
    Update,
    Fail,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InsertEventsSummary {
    pub inserted: u64,
    pub skipped: u64,
    pub updated: u64,
}

/// Predicate on the xmatches table: keep only events that have at least one
/// qualifying match.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasMatches {
    pub ignore_archival: bool,
    /// Upper bound on |delta_t|, Julian days.
    pub max_delta_t: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub names: Option<Vec<String>>,
    pub ids: Option<Vec<i64>>,
    pub status: Option<QueryStatus>,
    /// Events due another prompt pass: status `reprocess`, or `done` with a
    /// fresh enough observation and a stale enough last query.
    pub can_reprocess: bool,
    /// Per name, keep only the highest version (integer compare).
    pub latest_only: bool,
    pub has_matches: Option<HasMatches>,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum EventOrder {
    #[default]
    Id,
    ObsStartDesc,
    CreatedAtDesc,
}

impl EventOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            EventOrder::Id => "id",
            EventOrder::ObsStartDesc => "obs_start desc",
            EventOrder::CreatedAtDesc => "created_at desc",
        }
    }
}

const EVENT_UPSTREAM_COLUMNS: &str = "name, ra, dec, pos_err, obs_start, exp_time, flux, \
     src_id, src_significance, bkg_counts, net_counts, net_rate, version";

/// Insert a batch of events, atomically, as `pending`. Collisions on
/// `(name, version)` follow `policy`.
pub async fn insert_events(
    pool: &PgPool,
    batch: &[NewEvent],
    policy: DuplicatePolicy,
) -> Result<InsertEventsSummary> {
    for event in batch {
        parse_version_tag(&event.version)
            .with_context(|| format!("event '{}' carries a malformed version", event.name))?;
    }

    let mut summary = InsertEventsSummary::default();
    let mut tx = pool.begin().await.context("begin insert_events")?;

    for event in batch {
        let conflict_clause = match policy {
            DuplicatePolicy::Skip | DuplicatePolicy::Update => {
                "on conflict (name, version) do nothing"
            }
            DuplicatePolicy::Fail => "",
        };
        let sql = format!(
            "insert into events ({EVENT_UPSTREAM_COLUMNS}) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) {conflict_clause}"
        );
        let result = sqlx::query(&sql)
            .bind(&event.name)
            .bind(event.ra)
            .bind(event.dec)
            .bind(event.pos_err)
            .bind(event.obs_start)
            .bind(event.exp_time)
            .bind(event.flux)
            .bind(event.src_id)
            .bind(event.src_significance)
            .bind(event.bkg_counts)
            .bind(event.net_counts)
            .bind(event.net_rate)
            .bind(&event.version)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert event '{}' {}", event.name, event.version))?;

        if result.rows_affected() > 0 {
            summary.inserted += 1;
            continue;
        }

        match policy {
            DuplicatePolicy::Skip => summary.skipped += 1,
            DuplicatePolicy::Update => {
                sqlx::query(
                    r#"
                    update events
                    set ra = $1, dec = $2, pos_err = $3, obs_start = $4, exp_time = $5,
                        flux = $6, src_id = $7, src_significance = $8, bkg_counts = $9,
                        net_counts = $10, net_rate = $11, updated_at = now()
                    where name = $12 and version = $13
                    "#,
                )
                .bind(event.ra)
                .bind(event.dec)
                .bind(event.pos_err)
                .bind(event.obs_start)
                .bind(event.exp_time)
                .bind(event.flux)
                .bind(event.src_id)
                .bind(event.src_significance)
                .bind(event.bkg_counts)
                .bind(event.net_counts)
                .bind(event.net_rate)
                .bind(&event.name)
                .bind(&event.version)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("update event '{}' {}", event.name, event.version))?;
                summary.updated += 1;
            }
            DuplicatePolicy::Fail => {
                bail!(
                    "duplicate event ({}, {}) with duplicate_policy=fail",
                    event.name,
                    event.version
                )
            }
        }
    }

    tx.commit().await.context("commit insert_events")?;
    Ok(summary)
}

fn push_event_conditions(builder: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    if let Some(names) = &filter.names {
        builder.push(" and events.name = any(");
        builder.push_bind(names.clone());
        builder.push(")");
    }

    if let Some(ids) = &filter.ids {
        builder.push(" and events.id = any(");
        builder.push_bind(ids.clone());
        builder.push(")");
    }

    if let Some(status) = &filter.status {
        builder.push(" and events.query_status = ");
        builder.push_bind(status.as_db_value());
    }

    if filter.can_reprocess {
        // Re-query cadence: never more often than every ten minutes, never
        // for observations older than thirty-one days.
        builder.push(
            " and (events.query_status = 'reprocess' \
               or (events.query_status = 'done' \
                   and events.obs_start >= now() - interval '31 days' \
                   and (events.last_queried is null \
                        or events.last_queried < now() - interval '10 minutes')))",
        );
    }

    if filter.latest_only {
        builder.push(
            " and (substring(events.version from 2))::bigint = \
               (select max((substring(e2.version from 2))::bigint) \
                  from events as e2 where e2.name = events.name)",
        );
    }

    if let Some(has_matches) = &filter.has_matches {
        builder.push(" and exists (select 1 from xmatches as x where x.event_id = events.id");
        if let Some(max_dt) = has_matches.max_delta_t {
            builder.push(" and abs(x.delta_t) <= ");
            builder.push_bind(max_dt);
        }
        if has_matches.ignore_archival {
            builder.push(" and x.archival = false");
        }
        builder.push(")");
    }
}

/// Fetch events matching `filter`. Returns the page of rows plus the total
/// count across all pages.
pub async fn fetch_events(
    pool: &PgPool,
    filter: &EventFilter,
    page: Option<Page>,
    order: EventOrder,
) -> Result<(Vec<Event>, i64)> {
    let mut count_builder = QueryBuilder::<Postgres>::new(
        "select count(*) as n from events where 1=1",
    );
    push_event_conditions(&mut count_builder, filter);
    let (total,): (i64,) = count_builder
        .build_query_as()
        .fetch_one(pool)
        .await
        .context("count events failed")?;

    let mut builder = QueryBuilder::<Postgres>::new("select events.* from events where 1=1");
    push_event_conditions(&mut builder, filter);
    builder.push(format!(" order by {}", order.as_sql()));
    if let Some(page) = page {
        builder.push(" limit ");
        builder.push_bind(page.per_page);
        builder.push(" offset ");
        builder.push_bind(page.offset());
    }

    let rows = builder
        .build_query_as::<Event>()
        .fetch_all(pool)
        .await
        .context("fetch events failed")?;

    Ok((rows, total))
}

/// Fetch a single event by name, optionally pinned to a version.
pub async fn fetch_event(
    pool: &PgPool,
    name: &str,
    version: Option<&str>,
) -> Result<Option<Event>> {
    let mut builder = QueryBuilder::<Postgres>::new("select * from events where name = ");
    builder.push_bind(name.to_string());
    if let Some(version) = version {
        builder.push(" and version = ");
        builder.push_bind(version.to_string());
    }
    builder.push(" order by (substring(version from 2))::bigint desc limit 1");

    let event = builder
        .build_query_as::<Event>()
        .fetch_optional(pool)
        .await
        .with_context(|| format!("fetch event '{name}' failed"))?;
    Ok(event)
}

pub async fn fetch_event_by_id(pool: &PgPool, id: i64) -> Result<Option<Event>> {
    let event = sqlx::query_as::<_, Event>("select * from events where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("fetch event id={id} failed"))?;
    Ok(event)
}

/// Set `query_status` and stamp `last_queried`/`updated_at` in one statement.
pub async fn update_event_status<'e, E>(executor: E, id: i64, status: &QueryStatus) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "update events set query_status = $1, last_queried = now(), updated_at = now() \
         where id = $2",
    )
    .bind(status.as_db_value())
    .bind(id)
    .execute(executor)
    .await
    .with_context(|| format!("update status of event id={id}"))?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("event id={id} not found"));
    }
    Ok(())
}
