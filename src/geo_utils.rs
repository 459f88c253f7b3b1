//! Geographic utilities for GPS distance and trail geometry calculations.
//!
//! All distances are in meters. Segment distance uses a local equirectangular
//! projection and is only meant for trail-scale spans (sub-kilometer).

use crate::{Bounds, GpsPoint, TrailPoint};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude used for box lower bounds.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Calculate the great-circle distance between two points using the Haversine formula.
///
/// Returns exactly 0 for identical points and stays finite for antipodal ones.
///
/// # Example
/// ```
/// use trail_sentinel::GpsPoint;
/// use trail_sentinel::geo_utils::haversine_distance;
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.0, 0.001);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 111.19).abs() < 0.1);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    if p1 == p2 {
        return 0.0;
    }

    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = (p2.latitude - p1.latitude).to_radians();
    let dlng = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push `a` just outside [0, 1] near antipodes
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Shortest distance from `point` to the segment `start`..`end`.
///
/// The point is projected onto the segment in a local equirectangular frame
/// (longitude scaled by the cosine of the segment's mean latitude), the
/// projection parameter is clamped to [0, 1], and the haversine distance to
/// the clamped point is returned. A zero-length segment degrades to the
/// distance to `start`.
pub fn distance_to_segment(point: &GpsPoint, start: &GpsPoint, end: &GpsPoint) -> f64 {
    let mean_lat = ((start.latitude + end.latitude) / 2.0).to_radians();
    let lng_scale = mean_lat.cos();

    let seg_x = (end.longitude - start.longitude) * lng_scale;
    let seg_y = end.latitude - start.latitude;
    let len_sq = seg_x * seg_x + seg_y * seg_y;

    if len_sq == 0.0 {
        return haversine_distance(point, start);
    }

    let rel_x = (point.longitude - start.longitude) * lng_scale;
    let rel_y = point.latitude - start.latitude;
    let t = ((rel_x * seg_x + rel_y * seg_y) / len_sq).clamp(0.0, 1.0);

    let closest = GpsPoint::new(
        start.latitude + t * (end.latitude - start.latitude),
        start.longitude + t * (end.longitude - start.longitude),
    );

    haversine_distance(point, &closest)
}

/// Meters spanned by one degree of longitude at the given latitude.
pub fn meters_per_degree_lng(latitude: f64) -> f64 {
    METERS_PER_DEGREE * latitude.to_radians().cos()
}

/// Scale applied to box lower bounds.
///
/// The per-axis conversion slightly overestimates great-circle distance
/// (111 320 m/° against the 111 195 m/° implied by [`EARTH_RADIUS_METERS`]);
/// shrinking by half a percent keeps the bound below every exact distance at
/// trail scale.
const LOWER_BOUND_SLACK: f64 = 0.995;

/// Lower bound on the distance from `point` to anything inside `bounds`.
///
/// Returns 0 when the point lies inside the box. Never exceeds the haversine
/// distance to any point in the box for boxes within tens of kilometers.
pub fn min_distance_to_bounds(point: &GpsPoint, bounds: &Bounds) -> f64 {
    let dlat = (bounds.min_lat - point.latitude)
        .max(point.latitude - bounds.max_lat)
        .max(0.0);
    let dlng = (bounds.min_lng - point.longitude)
        .max(point.longitude - bounds.max_lng)
        .max(0.0);

    if dlat == 0.0 && dlng == 0.0 {
        return 0.0;
    }

    // Meridians converge toward the pole, so take the narrowest parallel involved
    let lng_meters = meters_per_degree_lng(point.latitude)
        .min(meters_per_degree_lng(bounds.min_lat))
        .min(meters_per_degree_lng(bounds.max_lat))
        .max(0.0);

    let dy = dlat * METERS_PER_DEGREE;
    let dx = dlng * lng_meters;
    (dx * dx + dy * dy).sqrt() * LOWER_BOUND_SLACK
}

/// Bounding box of a single segment.
pub fn segment_bounds(start: &GpsPoint, end: &GpsPoint) -> Bounds {
    Bounds {
        min_lat: start.latitude.min(end.latitude),
        max_lat: start.latitude.max(end.latitude),
        min_lng: start.longitude.min(end.longitude),
        max_lng: start.longitude.max(end.longitude),
    }
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[TrailPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0].to_gps(), &w[1].to_gps()))
        .sum()
}

/// Sum of positive elevation deltas along a polyline.
///
/// Vertices without elevation are skipped; the climb is measured between
/// consecutive vertices that do carry one.
pub fn elevation_gain(points: &[TrailPoint]) -> f64 {
    let mut gain = 0.0;
    let mut last: Option<f64> = None;

    for elevation in points.iter().filter_map(|p| p.elevation) {
        if let Some(prev) = last {
            if elevation > prev {
                gain += elevation - prev;
            }
        }
        last = Some(elevation);
    }

    gain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_identical_points() {
        let p = GpsPoint::new(-8.1077, 112.9224);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris is roughly 343 km
        let london = GpsPoint::new(51.5074, -0.1278);
        let paris = GpsPoint::new(48.8566, 2.3522);
        let d = haversine_distance(&london, &paris);
        assert!((d - 343_500.0).abs() < 1_500.0, "got {}", d);
    }

    #[test]
    fn test_haversine_antipodal_is_half_circumference() {
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(0.0, 180.0);
        let d = haversine_distance(&a, &b);
        let half = std::f64::consts::PI * EARTH_RADIUS_METERS;
        assert!(d.is_finite());
        assert!((d - half).abs() < 1.0);
    }

    #[test]
    fn test_degenerate_segment_equals_point_distance() {
        let points = [
            (GpsPoint::new(0.0, 0.0), GpsPoint::new(0.001, 0.001)),
            (GpsPoint::new(-8.1, 112.9), GpsPoint::new(-8.1, 112.9)),
            (GpsPoint::new(60.0, 10.0), GpsPoint::new(60.002, 9.998)),
        ];
        for (p, a) in &points {
            assert_eq!(distance_to_segment(p, a, a), haversine_distance(p, a));
        }
    }

    #[test]
    fn test_point_on_segment_is_zero() {
        let segments = [
            (GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, 0.001)),
            (GpsPoint::new(-8.10, 112.90), GpsPoint::new(-8.101, 112.902)),
            (GpsPoint::new(46.5, 7.9), GpsPoint::new(46.503, 7.904)),
        ];
        for (a, b) in &segments {
            for t in [0.0, 0.25, 0.5, 0.9, 1.0] {
                let p = GpsPoint::new(
                    a.latitude + t * (b.latitude - a.latitude),
                    a.longitude + t * (b.longitude - a.longitude),
                );
                let d = distance_to_segment(&p, a, b);
                assert!(d < 1e-6, "t={} gave {}", t, d);
            }
        }
    }

    #[test]
    fn test_projection_clamps_to_endpoints() {
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(0.0, 0.001);

        // Beyond `b` along the segment direction: nearest point is `b`
        let past_end = GpsPoint::new(0.0, 0.003);
        let expected = haversine_distance(&past_end, &b);
        assert!((distance_to_segment(&past_end, &a, &b) - expected).abs() < 1e-9);

        // Perpendicular offset from the middle
        let beside = GpsPoint::new(0.002, 0.0005);
        let d = distance_to_segment(&beside, &a, &b);
        assert!((d - 222.39).abs() < 0.5, "got {}", d);
    }

    #[test]
    fn test_box_lower_bound_never_overshoots() {
        let bounds = Bounds {
            min_lat: 46.500,
            max_lat: 46.503,
            min_lng: 7.900,
            max_lng: 7.904,
        };
        // Dense samples along the box outline; their minimum is never below the true minimum
        let outline: Vec<GpsPoint> = (0..=50)
            .flat_map(|i| {
                let f = i as f64 / 50.0;
                let lat = bounds.min_lat + f * (bounds.max_lat - bounds.min_lat);
                let lng = bounds.min_lng + f * (bounds.max_lng - bounds.min_lng);
                vec![
                    GpsPoint::new(lat, bounds.min_lng),
                    GpsPoint::new(lat, bounds.max_lng),
                    GpsPoint::new(bounds.min_lat, lng),
                    GpsPoint::new(bounds.max_lat, lng),
                ]
            })
            .collect();

        for i in 0..40 {
            let angle = i as f64 * std::f64::consts::PI / 20.0;
            let p = GpsPoint::new(46.5015 + 0.01 * angle.sin(), 7.902 + 0.01 * angle.cos());
            let bound = min_distance_to_bounds(&p, &bounds);
            let sampled = outline
                .iter()
                .map(|c| haversine_distance(&p, c))
                .fold(f64::INFINITY, f64::min);
            assert!(bound <= sampled, "bound {} > {}", bound, sampled);
        }

        assert_eq!(min_distance_to_bounds(&bounds.center(), &bounds), 0.0);
    }

    #[test]
    fn test_elevation_gain_skips_missing() {
        let points = vec![
            TrailPoint::with_elevation(0.0, 0.0, 1000.0),
            TrailPoint::new(0.0, 0.001),
            TrailPoint::with_elevation(0.0, 0.002, 1100.0),
            TrailPoint::with_elevation(0.0, 0.003, 1050.0),
            TrailPoint::with_elevation(0.0, 0.004, 1080.0),
        ];
        assert!((elevation_gain(&points) - 130.0).abs() < 1e-9);
        assert_eq!(elevation_gain(&[]), 0.0);
    }
}
