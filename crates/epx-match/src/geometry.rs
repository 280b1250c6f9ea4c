//! Sphere geometry.

/// Great-circle distance between two sky positions, in degrees.
///
/// Vincenty-style atan2 form: orders of magnitude faster than a full
/// coordinate-frame separation and, unlike the acos identity, numerically
/// stable for separations near zero.
pub fn great_circle_distance_deg(ra1_deg: f64, dec1_deg: f64, ra2_deg: f64, dec2_deg: f64) -> f64 {
    let ra1 = ra1_deg.to_radians();
    let dec1 = dec1_deg.to_radians();
    let ra2 = ra2_deg.to_radians();
    let dec2 = dec2_deg.to_radians();

    let delta_ra = (ra2 - ra1).abs();

    let numerator = ((dec2.cos() * delta_ra.sin()).powi(2)
        + (dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * delta_ra.cos()).powi(2))
    .sqrt();
    let denominator = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * delta_ra.cos();

    numerator.atan2(denominator).to_degrees()
}

/// Same distance in arcminutes, the unit the store keeps.
pub fn great_circle_distance_arcmin(
    ra1_deg: f64,
    dec1_deg: f64,
    ra2_deg: f64,
    dec2_deg: f64,
) -> f64 {
    great_circle_distance_deg(ra1_deg, dec1_deg, ra2_deg, dec2_deg) * 60.0
}
