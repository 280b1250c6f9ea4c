//! Annotation records and their wire form.
//!
//! The broker stores per-source annotations as parallel arrays
//! (`name[i]`, `delta_t[i]`, `distance_arcmin[i]`). That is a wire quirk:
//! internally this is an ordered list of per-event records keyed by event
//! name, serialized to parallel arrays only at the boundary. Arrays from
//! the wild may be ragged or carry nulls; decoding tolerates both.

use serde_json::{json, Value};

/// Origin tag marking this pipeline's annotations at the broker.
pub const ANNOTATION_ORIGIN: &str = "ZTF+EP";

/// One annotated event on a broker source.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAnnotation {
    pub name: String,
    pub delta_t: Option<f64>,
    pub distance_arcmin: Option<f64>,
}

/// Round to two decimals, the precision shipped downstream.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Decode the broker's parallel arrays into records.
pub fn from_parallel(data: &Value) -> Vec<EventAnnotation> {
    let Some(names) = data.get("name").and_then(Value::as_array) else {
        return Vec::new();
    };
    let delta_ts = data.get("delta_t").and_then(Value::as_array);
    let distances = data.get("distance_arcmin").and_then(Value::as_array);

    names
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let name = name.as_str()?;
            Some(EventAnnotation {
                name: name.to_string(),
                delta_t: delta_ts.and_then(|a| a.get(i)).and_then(Value::as_f64),
                distance_arcmin: distances.and_then(|a| a.get(i)).and_then(Value::as_f64),
            })
        })
        .collect()
}

/// Encode records back into the broker's parallel arrays.
pub fn to_parallel(records: &[EventAnnotation]) -> Value {
    json!({
        "name": records.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
        "delta_t": records.iter().map(|r| r.delta_t).collect::<Vec<_>>(),
        "distance_arcmin": records.iter().map(|r| r.distance_arcmin).collect::<Vec<_>>(),
    })
}

/// Update the record for `entry.name` in place, or append it.
pub fn upsert(records: &mut Vec<EventAnnotation>, entry: EventAnnotation) {
    match records.iter_mut().find(|r| r.name == entry.name) {
        Some(existing) => {
            existing.delta_t = entry.delta_t;
            existing.distance_arcmin = entry.distance_arcmin;
        }
        None => records.push(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, delta_t: f64, distance: f64) -> EventAnnotation {
        EventAnnotation {
            name: name.to_string(),
            delta_t: Some(delta_t),
            distance_arcmin: Some(distance),
        }
    }

    #[test]
    fn parallel_round_trip() {
        let records = vec![record("EP240301a", -0.25, 0.61), record("EP240315b", 0.4, 1.2)];
        let decoded = from_parallel(&to_parallel(&records));
        assert_eq!(decoded, records);
    }

    #[test]
    fn ragged_arrays_decode_what_exists() {
        let data = json!({
            "name": ["EP240301a", "EP240315b"],
            "delta_t": [-0.25],
            "distance_arcmin": [0.61, null],
        });
        let decoded = from_parallel(&data);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].delta_t, Some(-0.25));
        assert_eq!(decoded[1].delta_t, None);
        assert_eq!(decoded[1].distance_arcmin, None);
    }

    #[test]
    fn missing_name_array_is_empty() {
        assert!(from_parallel(&json!({})).is_empty());
        assert!(from_parallel(&json!({"name": "EP240301a"})).is_empty());
    }

    #[test]
    fn upsert_updates_in_place() {
        let mut records = vec![record("EP240301a", -0.25, 0.61)];
        upsert(&mut records, record("EP240301a", -0.20, 0.59));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delta_t, Some(-0.20));
    }

    #[test]
    fn upsert_appends_new_events() {
        let mut records = vec![record("EP240301a", -0.25, 0.61)];
        upsert(&mut records, record("EP240315b", 0.4, 1.2));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "EP240315b");
    }

    #[test]
    fn rounding_is_two_decimals() {
        assert_eq!(round2(0.61449), 0.61);
        assert_eq!(round2(0.126), 0.13);
        assert_eq!(round2(-1.234), -1.23);
        assert_eq!(round2(2.0), 2.0);
    }
}
