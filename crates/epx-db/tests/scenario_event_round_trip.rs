use chrono::{TimeZone, Utc};
use epx_db::{fetch_event, fetch_events, insert_events, DuplicatePolicy, EventFilter, EventOrder, NewEvent};
use uuid::Uuid;

fn sample_event(name: &str, version: &str) -> NewEvent {
    NewEvent {
        name: name.to_string(),
        ra: 10.0,
        dec: 20.0,
        pos_err: 0.01,
        obs_start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        exp_time: Some(1200.0),
        flux: Some(1.5e-11),
        src_id: Some(7),
        src_significance: Some(12.3),
        bkg_counts: Some(4.0),
        net_counts: Some(118.0),
        net_rate: Some(0.098),
        version: version.to_string(),
    }
}

#[tokio::test]
async fn insert_then_fetch_returns_the_same_event() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    let summary = insert_events(&pool, &[sample_event(&name, "v1")], DuplicatePolicy::Skip).await?;
    assert_eq!(summary.inserted, 1);

    let fetched = fetch_event(&pool, &name, Some("v1")).await?.expect("event inserted");
    assert_eq!(fetched.name, name);
    assert_eq!(fetched.version, "v1");
    assert_eq!(fetched.ra, 10.0);
    assert_eq!(fetched.pos_err, 0.01);
    assert_eq!(fetched.query_status, "pending");
    assert!(fetched.last_queried.is_none());
    assert_eq!(fetched.obs_start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    Ok(())
}

#[tokio::test]
async fn duplicate_policy_skip_keeps_the_first_row() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    insert_events(&pool, &[sample_event(&name, "v1")], DuplicatePolicy::Skip).await?;

    let mut again = sample_event(&name, "v1");
    again.ra = 99.0;
    let summary = insert_events(&pool, &[again], DuplicatePolicy::Skip).await?;
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.skipped, 1);

    let fetched = fetch_event(&pool, &name, Some("v1")).await?.unwrap();
    assert_eq!(fetched.ra, 10.0);
    Ok(())
}

#[tokio::test]
async fn duplicate_policy_update_overwrites_in_place() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    insert_events(&pool, &[sample_event(&name, "v1")], DuplicatePolicy::Skip).await?;

    let mut again = sample_event(&name, "v1");
    again.ra = 99.0;
    let summary = insert_events(&pool, &[again], DuplicatePolicy::Update).await?;
    assert_eq!(summary.updated, 1);

    let fetched = fetch_event(&pool, &name, Some("v1")).await?.unwrap();
    assert_eq!(fetched.ra, 99.0);

    let (rows, total) = fetch_events(
        &pool,
        &EventFilter {
            names: Some(vec![name.clone()]),
            ..Default::default()
        },
        None,
        EventOrder::Id,
    )
    .await?;
    assert_eq!(total, 1);
    assert_eq!(rows.len(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_policy_fail_surfaces_the_collision() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    insert_events(&pool, &[sample_event(&name, "v1")], DuplicatePolicy::Skip).await?;
    let err = insert_events(&pool, &[sample_event(&name, "v1")], DuplicatePolicy::Fail).await;
    assert!(err.is_err());
    Ok(())
}

#[tokio::test]
async fn malformed_version_aborts_the_whole_batch() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;

    let name = format!("EP{}", Uuid::new_v4().simple());
    let good = sample_event(&name, "v1");
    let bad = sample_event(&name, "1.0");
    assert!(insert_events(&pool, &[good, bad], DuplicatePolicy::Skip).await.is_err());

    // Nothing from the batch landed.
    assert!(fetch_event(&pool, &name, None).await?.is_none());
    Ok(())
}
