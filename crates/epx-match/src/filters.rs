//! Local post-filters applied after catalog retrieval.

use epx_catalog::AlertCandidate;

/// Red stellar contaminant: sits on top of a PS1 source that is at least
/// somewhat star-like, with one strongly red color pair. These survive the
/// catalog-side star/galaxy cut but are never transient counterparts.
///
/// Rejects when all of:
/// - `0 < distpsnr <= 1.0`
/// - `sgscore > 0.2`
/// - at least one of r-i, r-z, i-z exceeds 3 with both magnitudes positive
pub fn is_red_star(alert: &AlertCandidate) -> bool {
    let (Some(sgscore), Some(distpsnr)) = (alert.sgscore, alert.distpsnr) else {
        return false;
    };
    if !(distpsnr > 0.0 && distpsnr <= 1.0) {
        return false;
    }
    if !(sgscore > 0.2) {
        return false;
    }

    red_color_pair(alert.srmag, alert.simag)
        || red_color_pair(alert.srmag, alert.szmag)
        || red_color_pair(alert.simag, alert.szmag)
}

fn red_color_pair(bluer: Option<f64>, redder: Option<f64>) -> bool {
    match (bluer, redder) {
        (Some(b), Some(r)) => b > 0.0 && r > 0.0 && b - r > 3.0,
        _ => false,
    }
}

/// Drop red stars from a retrieved batch.
pub fn reject_red_stars(alerts: Vec<AlertCandidate>) -> Vec<AlertCandidate> {
    alerts.into_iter().filter(|a| !is_red_star(a)).collect()
}
