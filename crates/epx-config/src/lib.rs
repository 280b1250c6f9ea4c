//! epx-config
//!
//! Environment-backed settings for the three workers. Each worker reads only
//! its own block so a missing broker token does not stop the ingester.
//! Numeric tuning variables parse as floats and fall back to their defaults;
//! credentials are required and reject the placeholder values that ship in
//! sample env files.

use anyhow::{anyhow, Context, Result};

pub const ENV_RADIUS_MULTIPLIER: &str = "RADIUS_MULTIPLIER";
pub const ENV_DELTA_T: &str = "DELTA_T";
pub const ENV_DELTA_T_ARCHIVAL: &str = "DELTA_T_ARCHIVAL";
pub const ENV_DT_XMATCH_NONADMIN: &str = "DT_XMATCH_NONADMIN";
pub const ENV_MAX_EVENT_AGE: &str = "MAX_EVENT_AGE";

pub const ENV_EP_BASE_URL: &str = "EP_BASE_URL";
pub const ENV_EP_EMAIL: &str = "EP_EMAIL";
pub const ENV_EP_PASSWORD: &str = "EP_PASSWORD";

pub const ENV_KOWALSKI_BASE_URL: &str = "KOWALSKI_BASE_URL";
pub const ENV_KOWALSKI_TOKEN: &str = "KOWALSKI_TOKEN";
pub const ENV_KOWALSKI_TIMEOUT_SECS: &str = "KOWALSKI_TIMEOUT_SECS";

pub const ENV_FRITZ_HOST: &str = "FRITZ_HOST";
pub const ENV_FRITZ_TOKEN: &str = "FRITZ_TOKEN";
pub const ENV_FRITZ_FILTER_ID: &str = "FRITZ_FILTER_ID";
pub const ENV_FRITZ_IMPORT_GROUP_ID: &str = "FRITZ_IMPORT_GROUP_ID";

pub const ENV_POLL_INTERVAL_SECS: &str = "EPX_POLL_INTERVAL_SECS";
pub const ENV_MATCH_INTERVAL_SECS: &str = "EPX_MATCH_INTERVAL_SECS";
pub const ENV_FORWARD_INTERVAL_SECS: &str = "EPX_FORWARD_INTERVAL_SECS";

pub const DEFAULT_EP_BASE_URL: &str = "https://ep.bao.ac.cn/ep";
pub const DEFAULT_KOWALSKI_BASE_URL: &str = "https://kowalski.caltech.edu";

/// Settings for the upstream event poller.
#[derive(Debug, Clone)]
pub struct IngesterSettings {
    pub ep_base_url: String,
    pub ep_email: String,
    pub ep_password: String,
    pub poll_interval_secs: f64,
}

impl IngesterSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ep_base_url: env_or(ENV_EP_BASE_URL, DEFAULT_EP_BASE_URL),
            ep_email: env_required(ENV_EP_EMAIL)?,
            ep_password: env_required(ENV_EP_PASSWORD)?,
            poll_interval_secs: env_f64(ENV_POLL_INTERVAL_SECS, 300.0)?,
        })
    }
}

/// Settings for the cross-match worker.
#[derive(Debug, Clone)]
pub struct MatcherSettings {
    pub radius_multiplier: f64,
    /// Symmetric prompt half-window, in Julian days.
    pub delta_t: f64,
    /// Archival lookback extent, in Julian days.
    pub delta_t_archival: f64,
    pub kowalski_base_url: String,
    pub kowalski_token: String,
    pub kowalski_timeout_secs: f64,
    pub match_interval_secs: f64,
}

impl MatcherSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            radius_multiplier: env_f64(ENV_RADIUS_MULTIPLIER, 1.0)?,
            delta_t: env_f64(ENV_DELTA_T, 1.0)?,
            delta_t_archival: env_f64(ENV_DELTA_T_ARCHIVAL, 31.0)?,
            kowalski_base_url: env_or(ENV_KOWALSKI_BASE_URL, DEFAULT_KOWALSKI_BASE_URL),
            kowalski_token: env_required(ENV_KOWALSKI_TOKEN)?,
            kowalski_timeout_secs: env_f64(ENV_KOWALSKI_TIMEOUT_SECS, 10.0)?,
            match_interval_secs: env_f64(ENV_MATCH_INTERVAL_SECS, 30.0)?,
        })
    }
}

/// Settings for the downstream shipping worker.
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub fritz_host: String,
    pub fritz_token: String,
    pub fritz_filter_id: i64,
    pub fritz_import_group_id: i64,
    /// Events older than this many days are never shipped.
    pub max_event_age_days: f64,
    pub forward_interval_secs: f64,
}

impl ForwarderSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            fritz_host: env_required(ENV_FRITZ_HOST)?,
            fritz_token: env_required(ENV_FRITZ_TOKEN)?,
            fritz_filter_id: env_i64(ENV_FRITZ_FILTER_ID)?,
            fritz_import_group_id: env_i64(ENV_FRITZ_IMPORT_GROUP_ID)?,
            max_event_age_days: env_f64(ENV_MAX_EVENT_AGE, 31.0)?,
            forward_interval_secs: env_f64(ENV_FORWARD_INTERVAL_SECS, 60.0)?,
        })
    }
}

/// Half-width of the non-admin delta-t window, in minutes. Read by the
/// visibility filter helpers, not by any worker loop.
pub fn dt_xmatch_nonadmin_minutes() -> Result<f64> {
    env_f64(ENV_DT_XMATCH_NONADMIN, 60.0)
}

fn env_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_required(name: &str) -> Result<String> {
    let v = std::env::var(name).with_context(|| format!("missing env var {name}"))?;
    require_value(name, v)
}

fn env_f64(name: &str, default: f64) -> Result<f64> {
    parse_f64(name, std::env::var(name).ok(), default)
}

fn env_i64(name: &str) -> Result<i64> {
    let v = env_required(name)?;
    v.trim()
        .parse::<i64>()
        .with_context(|| format!("{name}='{v}' is not an integer"))
}

fn require_value(name: &str, v: String) -> Result<String> {
    let trimmed = v.trim();
    if trimmed.is_empty() || (trimmed.starts_with('<') && trimmed.ends_with('>')) {
        return Err(anyhow!("env var {name} is set to a placeholder value"));
    }
    Ok(trimmed.to_string())
}

fn parse_f64(name: &str, raw: Option<String>, default: f64) -> Result<f64> {
    match raw {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{name}='{v}' is not a number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_defaults_apply_when_unset() {
        assert_eq!(parse_f64("DELTA_T", None, 1.0).unwrap(), 1.0);
        assert_eq!(parse_f64("DELTA_T", Some("  ".into()), 1.0).unwrap(), 1.0);
    }

    #[test]
    fn float_values_parse() {
        assert_eq!(parse_f64("DELTA_T", Some("2.5".into()), 1.0).unwrap(), 2.5);
        assert!(parse_f64("DELTA_T", Some("a day".into()), 1.0).is_err());
    }

    #[test]
    fn placeholder_credentials_rejected() {
        assert!(require_value("FRITZ_TOKEN", "<your-fritz-token>".into()).is_err());
        assert!(require_value("FRITZ_TOKEN", "".into()).is_err());
        assert_eq!(
            require_value("FRITZ_TOKEN", " abc ".into()).unwrap(),
            "abc"
        );
    }
}
