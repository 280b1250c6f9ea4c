//! Upstream record validation.
//!
//! The feed occasionally reshuffles its payloads; a record missing any
//! allow-listed column aborts the whole batch so the store never holds a
//! partially ingested cycle.

use anyhow::{anyhow, bail, Context, Result};
use epx_db::NewEvent;
use epx_schemas::time::parse_obs_start;
use epx_schemas::{parse_version_tag, ALLOWED_EVENT_COLUMNS};
use epx_upstream::RawCandidate;
use serde_json::Value;

/// Validate a batch of raw candidates and convert them to insertable events.
/// All-or-nothing: any invalid record fails the whole batch.
pub fn candidates_to_events(records: &[RawCandidate]) -> Result<Vec<NewEvent>> {
    for (idx, record) in records.iter().enumerate() {
        let missing: Vec<&str> = ALLOWED_EVENT_COLUMNS
            .iter()
            .filter(|col| !record.contains_key(**col))
            .copied()
            .collect();
        if !missing.is_empty() {
            bail!(
                "candidate #{idx} does not have all required columns: {}",
                missing.join(", ")
            );
        }
    }

    records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            to_event(record).with_context(|| format!("candidate #{idx} failed validation"))
        })
        .collect()
}

fn to_event(record: &RawCandidate) -> Result<NewEvent> {
    let name = require_str(record, "name")?;
    let version = require_str(record, "version")?;
    parse_version_tag(&version)?;

    let obs_start = parse_obs_start(&require_str(record, "obs_start")?)?;

    Ok(NewEvent {
        name,
        ra: require_f64(record, "ra")?,
        dec: require_f64(record, "dec")?,
        pos_err: require_f64(record, "pos_err")?,
        obs_start,
        exp_time: opt_f64(record, "exp_time")?,
        flux: opt_f64(record, "flux")?,
        src_id: opt_i64(record, "src_id")?,
        src_significance: opt_f64(record, "src_significance")?,
        bkg_counts: opt_f64(record, "bkg_counts")?,
        net_counts: opt_f64(record, "net_counts")?,
        net_rate: opt_f64(record, "net_rate")?,
        version,
    })
}

fn require_str(record: &RawCandidate, key: &str) -> Result<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("column '{key}' is not a string"))
}

fn require_f64(record: &RawCandidate, key: &str) -> Result<f64> {
    record
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("column '{key}' is not a number"))
}

fn opt_f64(record: &RawCandidate, key: &str) -> Result<Option<f64>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow!("column '{key}' is not a number")),
    }
}

fn opt_i64(record: &RawCandidate, key: &str) -> Result<Option<i64>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow!("column '{key}' is not an integer")),
    }
}
