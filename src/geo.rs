//! Great-circle and point-to-segment distance helpers.

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1r = lat1.to_radians();
    let lat2r = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + lat1r.cos() * lat2r.cos() * (d_lon / 2.0).sin() * (d_lon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Distance in meters from point P to the segment AB, plus the projection
/// ratio along AB clamped to [0, 1] (0 = at A, 1 = at B).
///
/// The projection runs in an equirectangular plane, accurate to well under
/// 0.1% at low latitudes. The final distance is an exact haversine to the
/// projected point.
pub fn point_to_segment(
    p_lat: f64,
    p_lon: f64,
    a_lat: f64,
    a_lon: f64,
    b_lat: f64,
    b_lon: f64,
) -> (f64, f64) {
    let cos_lat = ((a_lat + b_lat) / 2.0).to_radians().cos();

    let ax = a_lon * cos_lat;
    let ay = a_lat;
    let bx = b_lon * cos_lat;
    let by = b_lat;
    let px = p_lon * cos_lat;
    let py = p_lat;

    // Degenerate segment: both endpoints coincide.
    if a_lat == b_lat && a_lon == b_lon {
        return (haversine(p_lat, p_lon, a_lat, a_lon), 0.0);
    }

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        return (haversine(p_lat, p_lon, a_lat, a_lon), 0.0);
    }

    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);

    let close_lat = a_lat + t * (b_lat - a_lat);
    let close_lon = a_lon + t * (b_lon - a_lon);

    (haversine(p_lat, p_lon, close_lat, close_lon), t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Roughly 111.2 km per degree of latitude.
        let d = haversine(1.0, 103.8, 2.0, 103.8);
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn haversine_zero() {
        assert_eq!(haversine(1.3, 103.8, 1.3, 103.8), 0.0);
    }

    #[test]
    fn projection_at_endpoints() {
        let (d0, r0) = point_to_segment(1.0, 103.0, 1.0, 103.0, 1.0, 103.01);
        assert_eq!(r0, 0.0);
        assert!(d0 < 1e-6);

        let (d1, r1) = point_to_segment(1.0, 103.01, 1.0, 103.0, 1.0, 103.01);
        assert_eq!(r1, 1.0);
        assert!(d1 < 1e-6);
    }

    #[test]
    fn projection_midpoint_perpendicular() {
        // A point just north of the segment midpoint.
        let (d, r) = point_to_segment(1.001, 103.005, 1.0, 103.0, 1.0, 103.01);
        assert!((r - 0.5).abs() < 0.05, "ratio {r}");
        assert!((d - 111.2).abs() < 1.0, "dist {d}");
    }

    #[test]
    fn projection_clamps_beyond_segment() {
        let (_, r) = point_to_segment(1.0, 103.02, 1.0, 103.0, 1.0, 103.01);
        assert_eq!(r, 1.0);
        let (_, r) = point_to_segment(1.0, 102.99, 1.0, 103.0, 1.0, 103.01);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn projection_degenerate_segment() {
        let (d, r) = point_to_segment(1.0, 103.001, 1.0, 103.0, 1.0, 103.0);
        assert_eq!(r, 0.0);
        assert!(d.is_finite());
        assert!(d > 0.0);
    }
}
