//! epx-testkit
//!
//! Shared plumbing for the end-to-end scenario tests: event seeding against
//! a real store (gated on EPX_DATABASE_URL), and canned responses for the
//! catalog and broker mock servers. Scenario tests live under `tests/`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use httpmock::prelude::*;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use epx_db::{insert_events, DuplicatePolicy, Event, NewEvent};

/// A name no other test run will collide with.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

pub fn sample_event(name: &str, version: &str, obs_start: DateTime<Utc>) -> NewEvent {
    NewEvent {
        name: name.to_string(),
        ra: 10.0,
        dec: 20.0,
        pos_err: 0.01,
        obs_start,
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

/// Insert one event as `pending` and read it back with its id.
pub async fn seed_event(pool: &PgPool, event: &NewEvent) -> Result<Event> {
    insert_events(pool, std::slice::from_ref(event), DuplicatePolicy::Skip).await?;
    epx_db::fetch_event(pool, &event.name, Some(&event.version))
        .await?
        .ok_or_else(|| anyhow!("seeded event '{}' not found", event.name))
}

/// A catalog alert with benign quality fields: passes every local filter
/// unless the test overrides something.
pub fn alert_json(candid: i64, object_id: &str, jd: f64, ra: f64, dec: f64) -> Value {
    json!({
        "candid": candid,
        "object_id": object_id,
        "jd": jd,
        "ra": ra,
        "dec": dec,
        "fid": 1,
        "magpsf": 18.4,
        "sigmapsf": 0.08,
        "drb": 0.97,
        "jdstarthist": jd - 0.5,
        "sgscore": 0.05,
        "distpsnr": 4.0,
        "ssdistnr": -999.0,
        "ssmagnr": -999.0,
        "ndethist": 3,
        "srmag": null,
        "simag": null,
        "szmag": null,
    })
}

/// Mount a cone-search answer for one event label.
pub fn mount_cone_response(server: &MockServer, label: &str, alerts: Vec<Value>) {
    let label = label.to_string();
    server.mock(move |when, then| {
        when.method(POST)
            .path(epx_catalog::QUERIES_PATH)
            .body_contains("cone_search")
            .body_contains(label.clone());

        let mut by_label = serde_json::Map::new();
        by_label.insert(label.clone(), Value::Array(alerts.clone()));
        let mut data = serde_json::Map::new();
        data.insert(
            epx_catalog::ZTF_ALERTS_CATALOG.to_string(),
            Value::Object(by_label),
        );

        then.status(200)
            .json_body(json!({ "status": "success", "data": data }));
    });
}

/// Mount an archival aggregation answer for one event label.
pub fn mount_archival_response(server: &MockServer, label: &str, alerts: Vec<Value>) {
    let label = label.to_string();
    server.mock(move |when, then| {
        when.method(POST)
            .path(epx_catalog::QUERIES_PATH)
            .body_contains("aggregate")
            .body_contains(label.clone());
        let data = if alerts.is_empty() {
            json!([])
        } else {
            json!([{ "_id": label.clone(), "objects": alerts.clone() }])
        };
        then.status(200)
            .json_body(json!({ "status": "success", "data": data }));
    });
}

/// Mount the broker's filter bootstrap.
pub fn mount_broker_bootstrap(server: &MockServer, filter_id: i64, group_id: i64) {
    server.mock(move |when, then| {
        when.method(GET).path("/api/filters");
        then.status(200).json_body(json!({
            "data": [{ "id": filter_id, "group_id": group_id }]
        }));
    });
}
