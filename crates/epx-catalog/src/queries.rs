//! Query builders for the alert catalog.
//!
//! Two shapes: a cone search for the prompt window, and an aggregation
//! pipeline for the archival lookback (position first, then time and
//! quality cuts, then most-recent-alert-per-object). Both carry the same
//! catalog-side quality cuts; only the prompt pass additionally requires a
//! positive-difference detection.

use serde_json::{json, Value};

pub const ZTF_ALERTS_CATALOG: &str = "ZTF_alerts";

/// Prompt-window cone search around one event.
#[derive(Debug, Clone)]
pub struct ConeSearchSpec {
    pub event_name: String,
    pub ra: f64,
    pub dec: f64,
    /// Search radius in arcseconds (error radius times the multiplier).
    pub radius_arcsec: f64,
    pub jd_start: f64,
    pub jd_end: f64,
}

/// Archival lookback around one event.
#[derive(Debug, Clone)]
pub struct ArchivalSearchSpec {
    pub event_name: String,
    pub ra: f64,
    pub dec: f64,
    /// Search radius in degrees (error radius times the multiplier).
    pub radius_deg: f64,
    pub jd_start: f64,
    pub jd_end: f64,
}

/// Catalog-side quality cuts shared by both passes.
///
/// - real/bogus: random-forest > 0.3, deep-learning > 0.5
/// - solar system: unknown distance, at least 12" away, or an implausible
///   counterpart magnitude outside [-20, 20]
/// - star/galaxy: drop sources with sgscore1 >= 0.7 sitting within 2" of a
///   PS1 source
///
/// The prompt pass opens its window exclusively: an alert sitting exactly
/// on the leading edge belongs to the archival pass, which closes at that
/// same instant inclusively.
fn quality_cuts(jd_start: f64, jd_end: f64, prompt: bool) -> Value {
    let lower_op = if prompt { "$gt" } else { "$gte" };
    let mut filter = json!({
        "candidate.jd": {
            lower_op: jd_start,
            "$lte": jd_end,
        },
        "candidate.rb": { "$gt": 0.3 },
        "candidate.drb": { "$gt": 0.5 },
        "$and": [
            {
                "$or": [
                    { "candidate.ssdistnr": { "$lt": 0 } },
                    { "candidate.ssdistnr": { "$gte": 12 } },
                    { "candidate.ssmagnr": { "$lte": -20 } },
                    { "candidate.ssmagnr": { "$gte": 20 } },
                ]
            },
            {
                "$or": [
                    { "candidate.sgscore1": { "$lt": 0.7 } },
                    { "candidate.distpsnr1": { "$lte": 0 } },
                    { "candidate.distpsnr1": { "$gt": 2 } },
                ]
            },
        ],
    });

    if prompt {
        filter["candidate.isdiffpos"] =
            json!({ "$in": ["t", "T", "true", "True", true, "1", 1] });
    }

    filter
}

/// Fields pulled back for every surviving alert. The three PS1 star colors
/// feed the local red-star post-filter only and are never persisted.
fn alert_projection() -> Value {
    json!({
        "_id": 0,
        "candid": 1,
        "object_id": "$objectId",
        "jd": "$candidate.jd",
        "ra": "$candidate.ra",
        "dec": "$candidate.dec",
        "fid": "$candidate.fid",
        "magpsf": "$candidate.magpsf",
        "sigmapsf": "$candidate.sigmapsf",
        "drb": "$candidate.drb",
        "jdstarthist": "$candidate.jdstarthist",
        "sgscore": "$candidate.sgscore1",
        "distpsnr": "$candidate.distpsnr1",
        "ssdistnr": "$candidate.ssdistnr",
        "ssmagnr": "$candidate.ssmagnr",
        "ndethist": "$candidate.ndethist",
        "srmag": "$candidate.srmag1",
        "simag": "$candidate.simag1",
        "szmag": "$candidate.szmag1",
    })
}

pub fn cone_search_query(spec: &ConeSearchSpec) -> Value {
    // The event name keys both the request coordinates and the per-event
    // result map that comes back.
    let mut radec = serde_json::Map::new();
    radec.insert(spec.event_name.clone(), json!([spec.ra, spec.dec]));

    let mut catalogs = serde_json::Map::new();
    catalogs.insert(
        ZTF_ALERTS_CATALOG.to_string(),
        json!({
            "filter": quality_cuts(spec.jd_start, spec.jd_end, true),
            "projection": alert_projection(),
        }),
    );

    json!({
        "query_type": "cone_search",
        "query": {
            "object_coordinates": {
                "radec": radec,
                "cone_search_radius": spec.radius_arcsec,
                "cone_search_unit": "arcsec",
            },
            "catalogs": catalogs,
        }
    })
}

pub fn archival_query(spec: &ArchivalSearchSpec) -> Value {
    // $centerSphere wants radians and a -180° RA offset.
    let radius_rad = spec.radius_deg.to_radians();

    let mut match_stage = quality_cuts(spec.jd_start, spec.jd_end, false);
    match_stage["coordinates.radec_geojson"] = json!({
        "$geoWithin": {
            "$centerSphere": [[spec.ra - 180.0, spec.dec], radius_rad]
        }
    });

    let per_object_first = json!({
        "_id": "$object_id",
        "candid": { "$first": "$candid" },
        "jd": { "$first": "$jd" },
        "ra": { "$first": "$ra" },
        "dec": { "$first": "$dec" },
        "fid": { "$first": "$fid" },
        "magpsf": { "$first": "$magpsf" },
        "sigmapsf": { "$first": "$sigmapsf" },
        "drb": { "$first": "$drb" },
        "jdstarthist": { "$first": "$jdstarthist" },
        "sgscore": { "$first": "$sgscore" },
        "distpsnr": { "$first": "$distpsnr" },
        "ssdistnr": { "$first": "$ssdistnr" },
        "ssmagnr": { "$first": "$ssmagnr" },
        "ndethist": { "$first": "$ndethist" },
        "srmag": { "$first": "$srmag" },
        "simag": { "$first": "$simag" },
        "szmag": { "$first": "$szmag" },
    });

    let pipeline = json!([
        { "$match": match_stage },
        { "$project": alert_projection() },
        { "$sort": { "jd": -1 } },
        { "$group": per_object_first },
        { "$addFields": { "event_name": spec.event_name.clone() } },
        {
            "$group": {
                "_id": "$event_name",
                "objects": { "$push": {
                    "object_id": "$_id",
                    "candid": "$candid",
                    "jd": "$jd",
                    "ra": "$ra",
                    "dec": "$dec",
                    "fid": "$fid",
                    "magpsf": "$magpsf",
                    "sigmapsf": "$sigmapsf",
                    "drb": "$drb",
                    "jdstarthist": "$jdstarthist",
                    "sgscore": "$sgscore",
                    "distpsnr": "$distpsnr",
                    "ssdistnr": "$ssdistnr",
                    "ssmagnr": "$ssmagnr",
                    "ndethist": "$ndethist",
                    "srmag": "$srmag",
                    "simag": "$simag",
                    "szmag": "$szmag",
                }}
            }
        },
    ]);

    json!({
        "query_type": "aggregate",
        "query": {
            "catalog": ZTF_ALERTS_CATALOG,
            "pipeline": pipeline,
        }
    })
}
