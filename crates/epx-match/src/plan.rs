//! Per-event query planning and cross-match row assembly.

use epx_catalog::{AlertCandidate, ArchivalSearchSpec, ConeSearchSpec};
use epx_db::{Event, NewXmatch};

use crate::geometry::great_circle_distance_arcmin;

/// Matcher tuning, all env-overridable.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    pub radius_multiplier: f64,
    /// Symmetric prompt half-window, Julian days.
    pub delta_t: f64,
    /// Archival lookback extent, Julian days.
    pub delta_t_archival: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            radius_multiplier: 1.0,
            delta_t: 1.0,
            delta_t_archival: 31.0,
        }
    }
}

/// Label keying one event within a catalog batch. Two versions of the same
/// name can be in flight in one cycle, so the bare name is not unique.
pub fn event_label(event: &Event) -> String {
    format!("{}:{}", event.name, event.version)
}

/// Prompt pass: symmetric window opening `delta_t` before the event,
/// trailing out to `delta_t_archival` after it.
pub fn prompt_spec(event: &Event, cfg: &MatchConfig) -> ConeSearchSpec {
    let jd = event.jd_obs_start();
    ConeSearchSpec {
        event_name: event_label(event),
        ra: event.ra,
        dec: event.dec,
        radius_arcsec: event.pos_err * 3600.0 * cfg.radius_multiplier,
        jd_start: jd - cfg.delta_t,
        jd_end: jd + cfg.delta_t_archival,
    }
}

/// Archival pass: everything from `delta_t_archival` before the prompt
/// window up to its leading edge.
pub fn archival_spec(event: &Event, cfg: &MatchConfig) -> ArchivalSearchSpec {
    let jd = event.jd_obs_start();
    ArchivalSearchSpec {
        event_name: event_label(event),
        ra: event.ra,
        dec: event.dec,
        radius_deg: event.pos_err * cfg.radius_multiplier,
        jd_start: jd - cfg.delta_t - cfg.delta_t_archival,
        jd_end: jd - cfg.delta_t,
    }
}

/// Assemble the persisted row for one surviving alert.
pub fn build_xmatch(event: &Event, alert: &AlertCandidate, archival: bool) -> NewXmatch {
    let distance_arcmin =
        great_circle_distance_arcmin(event.ra, event.dec, alert.ra, alert.dec);

    NewXmatch {
        event_id: event.id,
        candid: alert.candid,
        object_id: alert.object_id.clone(),
        jd: alert.jd,
        ra: alert.ra,
        dec: alert.dec,
        fid: alert.fid,
        magpsf: alert.magpsf,
        sigmapsf: alert.sigmapsf,
        drb: alert.drb,
        delta_t: alert.jd - event.jd_obs_start(),
        distance_arcmin,
        distance_ratio: distance_arcmin / (event.pos_err * 60.0),
        ndethist: alert.ndethist.map(|n| n as i32),
        sgscore: alert.sgscore,
        distpsnr: alert.distpsnr,
        ssdistnr: alert.ssdistnr,
        ssmagnr: alert.ssmagnr,
        age: alert.jdstarthist.map(|first| alert.jd - first),
        archival,
    }
}
