//! UTC instants and Julian Dates.
//!
//! The store keeps `TIMESTAMPTZ` columns; alert timestamps from the remote
//! catalog are Julian Dates. Conversions here are the single bridge between
//! the two, so every comparison happens in one convention.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Julian Date of the Unix epoch (1970-01-01T00:00:00Z).
const JD_UNIX_EPOCH: f64 = 2_440_587.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Julian Date of a UTC instant.
pub fn jd_from_utc(t: DateTime<Utc>) -> f64 {
    let secs = t.timestamp() as f64 + f64::from(t.timestamp_subsec_micros()) / 1e6;
    JD_UNIX_EPOCH + secs / SECONDS_PER_DAY
}

/// UTC instant of a Julian Date. `None` for values outside the
/// chrono-representable range.
pub fn utc_from_jd(jd: f64) -> Option<DateTime<Utc>> {
    let secs = (jd - JD_UNIX_EPOCH) * SECONDS_PER_DAY;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// ISO time with millisecond precision (`2024-03-01T00:00:00.000`), the
/// form the downstream broker expects for `passed_at`.
pub fn isot_from_jd(jd: f64) -> Result<String> {
    let t = utc_from_jd(jd).with_context(|| format!("jd {jd} out of representable range"))?;
    Ok(t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
}

/// Parse an upstream `obs_start` string (`YYYY-MM-DDTHH:MM:SSZ`) into a UTC
/// instant. Anything else is a validation failure.
pub fn parse_obs_start(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .with_context(|| format!("obs_start '{s}' is not YYYY-MM-DDTHH:MM:SSZ"))?;
    Ok(naive.and_utc())
}
