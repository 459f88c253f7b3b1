//! Scalar Kalman filter for GPS position smoothing.
//!
//! A single variance (in m²) is shared by both axes. It grows with the time
//! elapsed since the last fix and shrinks with every measurement, weighted by
//! the fix's reported accuracy.

use crate::error::{Result, TrailSentinelError};
use crate::{NoiseProfile, PositionEstimate};

/// Accuracy floor (meters) applied to every measurement.
pub const MIN_ACCURACY_METERS: f64 = 1.0;

/// Variance value marking an uninitialized filter.
const UNINITIALIZED: f64 = -1.0;

/// Position smoother owned by one tracking session.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    latitude: f64,
    longitude: f64,
    variance_meters2: f64,
    last_timestamp_ms: i64,
    process_noise: f64,
}

impl PositionFilter {
    /// Create an uninitialized filter with process-noise rate `q`.
    pub fn new(process_noise: f64) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            variance_meters2: UNINITIALIZED,
            last_timestamp_ms: 0,
            process_noise,
        }
    }

    pub fn with_profile(profile: NoiseProfile) -> Self {
        Self::new(profile.process_noise())
    }

    pub fn is_initialized(&self) -> bool {
        self.variance_meters2 >= 0.0
    }

    pub fn process_noise(&self) -> f64 {
        self.process_noise
    }

    /// Timestamp of the last accepted measurement, if any.
    pub fn last_timestamp_ms(&self) -> Option<i64> {
        self.is_initialized().then_some(self.last_timestamp_ms)
    }

    /// Current estimate, or `None` before the first measurement.
    pub fn estimate(&self) -> Option<PositionEstimate> {
        self.is_initialized().then(|| self.current())
    }

    /// Feed one measurement and return the updated estimate.
    ///
    /// The first measurement after creation or [`reset`](Self::reset) is
    /// adopted as-is. Non-finite coordinates are rejected without touching the
    /// state.
    pub fn process(
        &mut self,
        latitude: f64,
        longitude: f64,
        accuracy_meters: f64,
        timestamp_ms: i64,
    ) -> Result<PositionEstimate> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(TrailSentinelError::InvalidFix {
                timestamp_ms,
                message: format!("non-finite measurement ({}, {})", latitude, longitude),
            });
        }

        // NaN collapses to the floor as well
        let accuracy = accuracy_meters.max(MIN_ACCURACY_METERS);
        let measurement_variance = accuracy * accuracy;

        if !self.is_initialized() {
            self.latitude = latitude;
            self.longitude = longitude;
            self.variance_meters2 = measurement_variance;
            self.last_timestamp_ms = timestamp_ms;
            return self.checked();
        }

        // Out-of-order fixes count as zero elapsed time
        let dt = timestamp_ms.saturating_sub(self.last_timestamp_ms).max(0) as f64;
        let growth = dt * self.process_noise;
        self.variance_meters2 += growth * growth;
        self.last_timestamp_ms = timestamp_ms;

        let gain = self.variance_meters2 / (self.variance_meters2 + measurement_variance);
        self.latitude += gain * (latitude - self.latitude);
        self.longitude += gain * (longitude - self.longitude);
        self.variance_meters2 *= 1.0 - gain;

        self.checked()
    }

    /// Discard position and variance; the next measurement is adopted directly.
    pub fn reset(&mut self) {
        self.latitude = 0.0;
        self.longitude = 0.0;
        self.variance_meters2 = UNINITIALIZED;
        self.last_timestamp_ms = 0;
    }

    fn current(&self) -> PositionEstimate {
        PositionEstimate {
            latitude: self.latitude,
            longitude: self.longitude,
            variance_meters2: self.variance_meters2,
            timestamp_ms: self.last_timestamp_ms,
        }
    }

    fn checked(&self) -> Result<PositionEstimate> {
        let estimate = self.current();
        if !estimate.variance_meters2.is_finite()
            || estimate.variance_meters2 < 0.0
            || !estimate.latitude.is_finite()
            || !estimate.longitude.is_finite()
        {
            return Err(TrailSentinelError::InvariantViolation {
                component: "PositionFilter".to_string(),
                message: format!(
                    "state ({}, {}) with variance {}",
                    estimate.latitude, estimate.longitude, estimate.variance_meters2
                ),
            });
        }
        Ok(estimate)
    }
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self::with_profile(NoiseProfile::default())
    }
}
