use chrono::{Duration, Utc};
use httpmock::prelude::*;
use tokio_util::sync::CancellationToken;

use epx_broker::SkyPortalClient;
use epx_db::{store_prompt_matches, NewXmatch, XmatchFilter};
use epx_forward::{Forwarder, ForwarderConfig};
use epx_schemas::time::jd_from_utc;
use epx_testkit::{mount_broker_bootstrap, sample_event, seed_event, unique_name};

#[tokio::test]
async fn new_candidate_is_posted_imported_annotated_and_marked() -> anyhow::Result<()> {
    if std::env::var(epx_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: EPX_DATABASE_URL not set");
        return Ok(());
    }
    let pool = epx_db::testkit_db_pool().await?;
    let server = MockServer::start_async().await;

    let name = unique_name("E3-");
    let object_id = unique_name("ZTF24fw");
    let event = seed_event(&pool, &sample_event(&name, "v1", Utc::now() - Duration::days(1))).await?;

    let jd = jd_from_utc(Utc::now()) - 1.0;
    let row = NewXmatch {
        event_id: event.id,
        candid: 6001,
        object_id: object_id.clone(),
        jd,
        ra: 10.001,
        dec: 20.0,
        fid: Some(1),
        magpsf: Some(18.2),
        sigmapsf: Some(0.06),
        drb: Some(0.95),
        delta_t: -0.254,
        distance_arcmin: 0.614,
        distance_ratio: 1.02,
        ndethist: Some(2),
        sgscore: Some(0.1),
        distpsnr: Some(4.0),
        ssdistnr: None,
        ssmagnr: None,
        age: Some(0.3),
        archival: false,
    };
    store_prompt_matches(&pool, event.id, &[row]).await?;

    mount_broker_bootstrap(&server, 9, 41);
    let candidate_post = server.mock(|when, then| {
        when.method(POST)
            .path("/api/candidates")
            .body_contains(object_id.clone());
        then.status(200).json_body(serde_json::json!({"status": "success"}));
    });
    let import_post = server.mock(|when, then| {
        when.method(POST).path(format!("/api/alerts/{object_id}"));
        then.status(200).json_body(serde_json::json!({"status": "success"}));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/api/sources/{object_id}/annotations"));
        then.status(200).json_body(serde_json::json!({"data": []}));
    });
    let annotation_post = server.mock(|when, then| {
        when.method(POST)
            .path(format!("/api/sources/{object_id}/annotations"))
            .json_body_partial(
                serde_json::json!({
                    "origin": "ZTF+EP",
                    "data": {
                        "name": [name.clone()],
                        "delta_t": [-0.25],
                        "distance_arcmin": [0.61],
                    },
                })
                .to_string(),
            );
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

    candidate_post.assert_hits(1);
    import_post.assert_hits(1);
    annotation_post.assert_hits(1);

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
