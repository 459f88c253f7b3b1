//! Nearest-trail distance and raw safety classification.
//!
//! ## Algorithm
//!
//! 1. Skip trails with fewer than two points.
//! 2. Skip trails whose own padded box does not contain the point.
//! 3. Walk the segments in order. Once a finite best distance exists, skip any
//!    segment whose box lower bound already exceeds it.
//! 4. Exact distance via [`crate::geo_utils::distance_to_segment`] for the rest.
//!
//! The pruning in step 3 uses a true lower bound, so the result is identical
//! to an exhaustive scan.

use crate::geo_utils::{distance_to_segment, min_distance_to_bounds, segment_bounds};
use crate::{GpsPoint, SafetyStatus, ThresholdConfig, TrailGeometry};

/// Default padding around each trail's box for the cheap reject (~110 m).
pub const DEFAULT_TRAIL_PADDING_DEGREES: f64 = 0.001;

/// Outcome of assessing one smoothed point against nearby trails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    /// Nearest distance in meters; infinite when no geometry was usable
    pub distance_meters: f64,
    pub tier: SafetyStatus,
}

impl Assessment {
    /// Whether any trail geometry contributed a distance.
    pub fn has_trail_data(&self) -> bool {
        self.distance_meters.is_finite()
    }
}

/// Stateless distance/classification engine. Safe to share between sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationEngine {
    thresholds: ThresholdConfig,
    trail_padding_degrees: f64,
}

impl Default for DeviationEngine {
    fn default() -> Self {
        Self::new(ThresholdConfig::default(), DEFAULT_TRAIL_PADDING_DEGREES)
    }
}

impl DeviationEngine {
    pub fn new(thresholds: ThresholdConfig, trail_padding_degrees: f64) -> Self {
        Self {
            thresholds,
            trail_padding_degrees,
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn trail_padding_degrees(&self) -> f64 {
        self.trail_padding_degrees
    }

    /// Minimum distance from `point` to any candidate trail, in meters.
    ///
    /// Returns `f64::INFINITY` when no candidate has usable geometry near the
    /// point. That means "no trail data", not "far from the trail".
    pub fn nearest_trail_distance<T: AsRef<TrailGeometry>>(
        &self,
        point: &GpsPoint,
        candidates: &[T],
    ) -> f64 {
        let mut min_distance = f64::INFINITY;

        for trail in candidates.iter().map(|c| -> &TrailGeometry { c.as_ref() }) {
            if !self.accepts(trail, point) {
                continue;
            }

            for pair in trail.points.windows(2) {
                let start = pair[0].to_gps();
                let end = pair[1].to_gps();

                if min_distance.is_finite() {
                    let lower_bound = min_distance_to_bounds(point, &segment_bounds(&start, &end));
                    if lower_bound > min_distance {
                        continue;
                    }
                }

                let d = distance_to_segment(point, &start, &end);
                if d < min_distance {
                    min_distance = d;
                }
            }
        }

        min_distance
    }

    /// Same contract as [`nearest_trail_distance`](Self::nearest_trail_distance)
    /// without segment pruning.
    pub fn nearest_trail_distance_exhaustive<T: AsRef<TrailGeometry>>(
        &self,
        point: &GpsPoint,
        candidates: &[T],
    ) -> f64 {
        candidates
            .iter()
            .map(|c| -> &TrailGeometry { c.as_ref() })
            .filter(|trail| self.accepts(trail, point))
            .flat_map(|trail| trail.points.windows(2))
            .map(|pair| distance_to_segment(point, &pair[0].to_gps(), &pair[1].to_gps()))
            .fold(f64::INFINITY, f64::min)
    }

    fn accepts(&self, trail: &TrailGeometry, point: &GpsPoint) -> bool {
        trail.is_queryable()
            && trail
                .bounds
                .expand(self.trail_padding_degrees)
                .contains(point)
    }

    /// Map a distance to a raw tier. Non-finite distances are DANGER.
    pub fn classify(&self, distance_meters: f64) -> SafetyStatus {
        classify_distance(&self.thresholds, distance_meters)
    }

    /// Distance plus tier, applying the fail-closed policy: no candidates at
    /// all, or none with usable geometry, is DANGER.
    pub fn assess<T: AsRef<TrailGeometry>>(&self, point: &GpsPoint, candidates: &[T]) -> Assessment {
        if candidates.is_empty() {
            return Assessment {
                distance_meters: f64::INFINITY,
                tier: SafetyStatus::Danger,
            };
        }

        let distance_meters = self.nearest_trail_distance(point, candidates);
        Assessment {
            distance_meters,
            tier: self.classify(distance_meters),
        }
    }
}

/// Threshold classification shared by the engine and the monitor.
pub(crate) fn classify_distance(thresholds: &ThresholdConfig, distance_meters: f64) -> SafetyStatus {
    if distance_meters <= thresholds.warning_threshold_meters {
        SafetyStatus::Safe
    } else if distance_meters <= thresholds.danger_threshold_meters {
        SafetyStatus::Warning
    } else {
        // Also catches NaN and +inf
        SafetyStatus::Danger
    }
}
