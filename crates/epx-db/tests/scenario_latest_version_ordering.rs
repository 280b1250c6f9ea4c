use chrono::{Duration, Utc};
use epx_db::{
    fetch_events, fetch_xmatches, insert_events, store_prompt_matches, DuplicatePolicy,
    EventFilter, EventOrder, NewEvent, NewXmatch, XmatchFilter,
};
use sqlx::PgPool;
use uuid::Uuid;

fn event(name: &str, version: &str) -> NewEvent {
    NewEvent {
        name: name.to_string(),
        ra: 42.0,
        dec: 7.0,
        pos_err: 0.01,
        obs_start: Utc::now() - Duration::days(2),
        exp_time: None,
        flux: None,
        src_id: None,
        src_significance: None,
        bkg_counts: None,
        net_counts: None,
        net_rate: None,
        version: version.to_string(),
    }
}

fn xm(event_id: i64, candid: i64) -> NewXmatch {
    NewXmatch {
        event_id,
        candid,
        object_id: format!("ZTF24x{candid:07}"),
        jd: 2_460_370.6,
        ra: 42.001,
        dec: 7.001,
        fid: Some(2),
        magpsf: Some(19.1),
        sigmapsf: Some(0.1),
        drb: Some(0.9),
        delta_t: 0.1,
        distance_arcmin: 0.2,
        distance_ratio: 0.4,
        ndethist: Some(1),
        sgscore: None,
        distpsnr: None,
        ssdistnr: None,
        ssmagnr: None,
        age: None,
        archival: false,
    }
}

async fn event_id(pool: &PgPool, name: &str, version: &str) -> anyhow::Result<i64> {
    let (id,): (i64,) = sqlx::query_as("select id from events where name = $1 and version = $2")
        .bind(name)
        .bind(version)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

#[tokio::test]
async fn latest_only_compares_versions_as_integers() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    insert_events(
        &pool,
        &[event(&name, "v1"), event(&name, "v9"), event(&name, "v10")],
        DuplicatePolicy::Skip,
    )
    .await?;

    let (rows, total) = fetch_events(
        &pool,
        &EventFilter {
            names: Some(vec![name.clone()]),
            latest_only: true,
            ..Default::default()
        },
        None,
        EventOrder::Id,
    )
    .await?;

    // "v9" is the textual max; v10 must win the integer compare.
    assert_eq!(total, 1);
    assert_eq!(rows[0].version, "v10");
    Ok(())
}

#[tokio::test]
async fn deduplicate_by_event_name_keeps_latest_version_rows() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    insert_events(&pool, &[event(&name, "v2"), event(&name, "v10")], DuplicatePolicy::Skip).await?;
    let old_id = event_id(&pool, &name, "v2").await?;
    let new_id = event_id(&pool, &name, "v10").await?;

    store_prompt_matches(&pool, old_id, &[xm(old_id, 1)]).await?;
    store_prompt_matches(&pool, new_id, &[xm(new_id, 2)]).await?;

    let (rows, total) = fetch_xmatches(
        &pool,
        &XmatchFilter {
            event_ids: Some(vec![old_id, new_id]),
            deduplicate_by_event_name: true,
            ..Default::default()
        },
        None,
    )
    .await?;
    assert_eq!(total, 1);
    assert_eq!(rows[0].event_id, new_id);
    Ok(())
}
