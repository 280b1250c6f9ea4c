use chrono::{Duration, Utc};
use epx_db::{
    fetch_event_by_id, fetch_xmatches, insert_events, reprocess_all, reprocess_event,
    store_archival_matches, store_prompt_matches, DuplicatePolicy, NewEvent, NewXmatch,
    XmatchFilter,
};
use sqlx::PgPool;
use uuid::Uuid;

fn event(name: &str) -> NewEvent {
    NewEvent {
        name: name.to_string(),
        ra: 10.0,
        dec: 20.0,
        pos_err: 0.01,
        obs_start: Utc::now() - Duration::days(1),
        exp_time: None,
        flux: None,
        src_id: None,
        src_significance: None,
        bkg_counts: None,
        net_counts: None,
        net_rate: None,
        version: "v1".to_string(),
    }
}

fn xm(event_id: i64, candid: i64, archival: bool) -> NewXmatch {
    NewXmatch {
        event_id,
        candid,
        object_id: format!("ZTF24r{candid:07}"),
        jd: 2_460_370.0 + candid as f64 * 0.01,
        ra: 10.001,
        dec: 20.001,
        fid: Some(1),
        magpsf: Some(18.0),
        sigmapsf: Some(0.05),
        drb: Some(0.95),
        delta_t: if archival { -5.0 } else { 0.3 },
        distance_arcmin: 0.2,
        distance_ratio: 0.3,
        ndethist: Some(2),
        sgscore: None,
        distpsnr: None,
        ssdistnr: None,
        ssmagnr: None,
        age: None,
        archival,
    }
}

async fn seed(pool: &PgPool) -> anyhow::Result<i64> {
    let name = format!("EP{}", Uuid::new_v4().simple());
    insert_events(pool, &[event(&name)], DuplicatePolicy::Skip).await?;
    let (id,): (i64,) = sqlx::query_as("select id from events where name = $1")
        .bind(&name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

async fn rows_for(pool: &PgPool, event_id: i64) -> anyhow::Result<Vec<epx_db::Xmatch>> {
    let (rows, _) = fetch_xmatches(
        pool,
        &XmatchFilter {
            event_ids: Some(vec![event_id]),
            ..Default::default()
        },
        None,
    )
    .await?;
    Ok(rows)
}

#[tokio::test]
async fn prompt_rewrite_spares_archival_rows() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let id = seed(&pool).await?;
    store_archival_matches(&pool, id, &[xm(id, 1, true)]).await?;
    store_prompt_matches(&pool, id, &[xm(id, 2, false), xm(id, 3, false)]).await?;

    // A second prompt pass with a different row set replaces only prompt rows.
    store_prompt_matches(&pool, id, &[xm(id, 4, false)]).await?;

    let rows = rows_for(&pool, id).await?;
    let mut candids: Vec<i64> = rows.iter().map(|r| r.candid).collect();
    candids.sort();
    assert_eq!(candids, vec![1, 4]);

    let ev = fetch_event_by_id(&pool, id).await?.unwrap();
    assert_eq!(ev.query_status, "done");
    assert!(ev.last_queried.is_some());
    Ok(())
}

#[tokio::test]
async fn per_event_reprocess_can_keep_archival() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let id = seed(&pool).await?;
    store_archival_matches(&pool, id, &[xm(id, 1, true)]).await?;
    store_prompt_matches(&pool, id, &[xm(id, 2, false)]).await?;

    let deleted = reprocess_event(&pool, id, true).await?;
    assert_eq!(deleted, 1);

    let rows = rows_for(&pool, id).await?;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].archival);

    let ev = fetch_event_by_id(&pool, id).await?.unwrap();
    assert_eq!(ev.query_status, "reprocess");
    Ok(())
}

#[tokio::test]
async fn bulk_reprocess_clears_everything_for_the_event() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let id = seed(&pool).await?;
    store_archival_matches(&pool, id, &[xm(id, 1, true)]).await?;
    store_prompt_matches(&pool, id, &[xm(id, 2, false)]).await?;

    // Bulk reprocess is global; at minimum this event's rows are gone and
    // its status is flipped.
    reprocess_all(&pool).await?;

    assert!(rows_for(&pool, id).await?.is_empty());
    let ev = fetch_event_by_id(&pool, id).await?.unwrap();
    assert_eq!(ev.query_status, "reprocess");
    Ok(())
}
