use chrono::{Duration, Utc};
use httpmock::prelude::*;
use tokio_util::sync::CancellationToken;

use epx_broker::{SkyPortalClient, DUPLICATE_CANDIDATE_MARKER};
use epx_db::{store_prompt_matches, NewXmatch, XmatchFilter};
use epx_forward::{Forwarder, ForwarderConfig};
use epx_schemas::time::jd_from_utc;
use epx_testkit::{mount_broker_bootstrap, sample_event, seed_event, unique_name};

#[tokio::test]
async fn duplicate_key_rejection_still_annotates_and_marks() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;
    let server = MockServer::start_async().await;

    let name = unique_name("E4-");
    let object_id = unique_name("ZTF24dp");
    let event = seed_event(&pool, &sample_event(&name, "v1", Utc::now() - Duration::days(1))).await?;

    let row = NewXmatch {
        event_id: event.id,
        candid: 7001,
        object_id: object_id.clone(),
        jd: jd_from_utc(Utc::now()) - 0.5,
        ra: 10.001,
        dec: 20.0,
        fid: Some(2),
        magpsf: Some(19.0),
        sigmapsf: Some(0.09),
        drb: Some(0.91),
        delta_t: 0.3,
        distance_arcmin: 0.2,
        distance_ratio: 0.33,
        ndethist: Some(1),
        sgscore: Some(0.1),
        distpsnr: Some(4.0),
        ssdistnr: None,
        ssmagnr: None,
        age: Some(0.1),
        archival: false,
    };
    store_prompt_matches(&pool, event.id, &[row]).await?;

    mount_broker_bootstrap(&server, 9, 41);
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/candidates")
            .body_contains(object_id.clone());
        then.status(400).json_body(serde_json::json!({
            "message": format!("something went wrong: {DUPLICATE_CANDIDATE_MARKER}"),
        }));
    });
    // No import mock mounted: an already-known candidate must not trigger
    // the photometry import (an attempt would 404 and fail the row).
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/api/sources/{object_id}/annotations"));
        then.status(200).json_body(serde_json::json!({"data": []}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path(format!("/api/sources/{object_id}/annotations"));
        then.status(200).json_body(serde_json::json!({"status": "success"}));
    });

    let broker = SkyPortalClient::connect(server.base_url(), "tok".to_string(), 9).await?;
    let forwarder = Forwarder::new(
        pool.clone(),
        broker,
        41,
        ForwarderConfig {
            max_event_age_days: 31.0,
            interval_secs: 60.0,
        },
    );
    forwarder.tick(&CancellationToken::new()).await?;

    let (rows, _) = epx_db::fetch_xmatches(
        &pool,
        &XmatchFilter {
            event_ids: Some(vec![event.id]),
            ..Default::default()
        },
        None,
    )
    .await?;
    assert!(rows[0].to_broker);

    Ok(())
}
