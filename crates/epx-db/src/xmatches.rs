//! Cross-match store operations.
//!
//! Insertion is always an upsert on `(event_id, candid)` so a partially
//! failed cycle can be retried without producing duplicate rows. The
//! `to_broker` flag is written by exactly one statement and only flips
//! false→true; a reprocess deletes rows instead of clearing it.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use epx_schemas::QueryStatus;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::events::{update_event_status, DuplicatePolicy};
use crate::models::{NewXmatch, Xmatch};
use crate::{take_matcher_lock, Page};

#[derive(Debug, Clone, Default)]
pub struct XmatchFilter {
    pub event_ids: Option<Vec<i64>>,
    pub object_id: Option<String>,
    pub archival: Option<bool>,
    pub to_broker: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Lower bound on the alert Julian Date.
    pub detected_after: Option<f64>,
    pub min_delta_t: Option<f64>,
    pub max_delta_t: Option<f64>,
    /// Drop rows whose event observation is older than this many days.
    pub event_age_days: Option<f64>,
    /// Per event name, keep only rows of the highest event version.
    pub deduplicate_by_event_name: bool,
}

/// Upsert a batch of cross-match rows on the given connection.
pub async fn insert_xmatches(
    conn: &mut PgConnection,
    rows: &[NewXmatch],
    policy: DuplicatePolicy,
) -> Result<u64> {
    let conflict_clause = match policy {
        DuplicatePolicy::Skip => "on conflict (event_id, candid) do nothing",
        DuplicatePolicy::Update => {
            "on conflict (event_id, candid) do update set \
               object_id = excluded.object_id, jd = excluded.jd, ra = excluded.ra, \
               dec = excluded.dec, fid = excluded.fid, magpsf = excluded.magpsf, \
               sigmapsf = excluded.sigmapsf, drb = excluded.drb, delta_t = excluded.delta_t, \
               distance_arcmin = excluded.distance_arcmin, \
               distance_ratio = excluded.distance_ratio, ndethist = excluded.ndethist, \
               sgscore = excluded.sgscore, distpsnr = excluded.distpsnr, \
               ssdistnr = excluded.ssdistnr, ssmagnr = excluded.ssmagnr, \
               age = excluded.age, archival = excluded.archival, updated_at = now()"
        }
        DuplicatePolicy::Fail => "",
    };

    let sql = format!(
        "insert into xmatches (event_id, candid, object_id, jd, ra, dec, fid, magpsf, \
           sigmapsf, drb, delta_t, distance_arcmin, distance_ratio, ndethist, sgscore, \
           distpsnr, ssdistnr, ssmagnr, age, archival) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
           $17, $18, $19, $20) {conflict_clause}"
    );

    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(&sql)
            .bind(row.event_id)
            .bind(row.candid)
            .bind(&row.object_id)
            .bind(row.jd)
            .bind(row.ra)
            .bind(row.dec)
            .bind(row.fid)
            .bind(row.magpsf)
            .bind(row.sigmapsf)
            .bind(row.drb)
            .bind(row.delta_t)
            .bind(row.distance_arcmin)
            .bind(row.distance_ratio)
            .bind(row.ndethist)
            .bind(row.sgscore)
            .bind(row.distpsnr)
            .bind(row.ssdistnr)
            .bind(row.ssmagnr)
            .bind(row.age)
            .bind(row.archival)
            .execute(&mut *conn)
            .await
            .with_context(|| {
                format!(
                    "insert xmatch event_id={} candid={}",
                    row.event_id, row.candid
                )
            })?;
        written += result.rows_affected();
    }
    Ok(written)
}

/// Delete an event's cross-match rows, optionally sparing archival ones.
pub async fn delete_xmatches_for_event<'e, E>(
    executor: E,
    event_id: i64,
    keep_archival: bool,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = if keep_archival {
        "delete from xmatches where event_id = $1 and archival = false"
    } else {
        "delete from xmatches where event_id = $1"
    };
    let result = sqlx::query(sql)
        .bind(event_id)
        .execute(executor)
        .await
        .with_context(|| format!("delete xmatches of event id={event_id}"))?;
    Ok(result.rows_affected())
}

fn push_xmatch_conditions(
    builder: &mut QueryBuilder<'_, Postgres>,
    filter: &XmatchFilter,
    now: DateTime<Utc>,
) {
    if let Some(event_ids) = &filter.event_ids {
        builder.push(" and xmatches.event_id = any(");
        builder.push_bind(event_ids.clone());
        builder.push(")");
    }

    if let Some(object_id) = &filter.object_id {
        builder.push(" and xmatches.object_id = ");
        builder.push_bind(object_id.clone());
    }

    if let Some(archival) = filter.archival {
        builder.push(" and xmatches.archival = ");
        builder.push_bind(archival);
    }

    if let Some(to_broker) = filter.to_broker {
        builder.push(" and xmatches.to_broker = ");
        builder.push_bind(to_broker);
    }

    if let Some(created_after) = filter.created_after {
        builder.push(" and xmatches.created_at >= ");
        builder.push_bind(created_after);
    }

    if let Some(created_before) = filter.created_before {
        builder.push(" and xmatches.created_at <= ");
        builder.push_bind(created_before);
    }

    if let Some(detected_after) = filter.detected_after {
        builder.push(" and xmatches.jd >= ");
        builder.push_bind(detected_after);
    }

    if let Some(min_dt) = filter.min_delta_t {
        builder.push(" and xmatches.delta_t >= ");
        builder.push_bind(min_dt);
    }

    if let Some(max_dt) = filter.max_delta_t {
        builder.push(" and xmatches.delta_t <= ");
        builder.push_bind(max_dt);
    }

    if let Some(age_days) = filter.event_age_days {
        let cutoff = now - Duration::seconds((age_days * 86_400.0) as i64);
        builder.push(
            " and xmatches.event_id in (select e.id from events as e where e.obs_start >= ",
        );
        builder.push_bind(cutoff);
        builder.push(")");
    }

    if filter.deduplicate_by_event_name {
        builder.push(
            " and xmatches.event_id in (select e.id from events as e \
               where (substring(e.version from 2))::bigint = \
                 (select max((substring(e2.version from 2))::bigint) \
                    from events as e2 where e2.name = e.name))",
        );
    }
}

/// Fetch cross-matches for `filter`, ordered by alert JD descending then
/// object id descending. Returns the page of rows plus the total count.
pub async fn fetch_xmatches(
    pool: &PgPool,
    filter: &XmatchFilter,
    page: Option<Page>,
) -> Result<(Vec<Xmatch>, i64)> {
    if let (Some(min_dt), Some(max_dt)) = (filter.min_delta_t, filter.max_delta_t) {
        if max_dt < min_dt {
            bail!("max_delta_t ({max_dt}) must be >= min_delta_t ({min_dt})");
        }
    }

    let now = Utc::now();

    let mut count_builder =
        QueryBuilder::<Postgres>::new("select count(*) as n from xmatches where 1=1");
    push_xmatch_conditions(&mut count_builder, filter, now);
    let (total,): (i64,) = count_builder
        .build_query_as()
        .fetch_one(pool)
        .await
        .context("count xmatches failed")?;

    let mut builder = QueryBuilder::<Postgres>::new("select xmatches.* from xmatches where 1=1");
    push_xmatch_conditions(&mut builder, filter, now);
    builder.push(" order by xmatches.jd desc, xmatches.object_id desc");
    if let Some(page) = page {
        builder.push(" limit ");
        builder.push_bind(page.per_page);
        builder.push(" offset ");
        builder.push_bind(page.offset());
    }

    let rows = builder
        .build_query_as::<Xmatch>()
        .fetch_all(pool)
        .await
        .context("fetch xmatches failed")?;

    Ok((rows, total))
}

/// Flip `to_broker` for one row. The flag never goes back.
pub async fn mark_xmatch_shipped<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "update xmatches set to_broker = true, updated_at = now() where id = $1",
    )
    .bind(id)
    .execute(executor)
    .await
    .with_context(|| format!("mark xmatch id={id} shipped"))?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("xmatch id={id} not found"));
    }
    Ok(())
}

/// True when an alert of the same object with a strictly later JD has
/// already been shipped downstream.
pub async fn shipped_later_exists(pool: &PgPool, object_id: &str, jd: f64) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        "select exists (select 1 from xmatches \
           where object_id = $1 and jd > $2 and to_broker = true)",
    )
    .bind(object_id)
    .bind(jd)
    .fetch_one(pool)
    .await
    .context("shipped_later_exists query failed")?;
    Ok(exists)
}

/// Prompt write path for one event: replace its prompt rows with `rows` and
/// mark it `done`, in a single commit serialized against admin reprocess.
pub async fn store_prompt_matches(
    pool: &PgPool,
    event_id: i64,
    rows: &[NewXmatch],
) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin store_prompt_matches")?;
    take_matcher_lock(&mut tx).await?;
    delete_xmatches_for_event(&mut *tx, event_id, true).await?;
    let written = insert_xmatches(&mut tx, rows, DuplicatePolicy::Update).await?;
    update_event_status(&mut *tx, event_id, &QueryStatus::Done).await?;
    tx.commit().await.context("commit store_prompt_matches")?;
    Ok(written)
}

/// Archival write path for one event: upsert rows, leave the status alone
/// (the prompt pass decides the terminal state).
pub async fn store_archival_matches(
    pool: &PgPool,
    event_id: i64,
    rows: &[NewXmatch],
) -> Result<u64> {
    let mut tx = pool.begin().await.context("begin store_archival_matches")?;
    take_matcher_lock(&mut tx).await?;
    let written = insert_xmatches(&mut tx, rows, DuplicatePolicy::Update).await?;
    tx.commit().await.context("commit store_archival_matches")?;
    Ok(written)
}
