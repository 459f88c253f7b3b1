//! Tracking configuration: safety thresholds, filter noise and session tuning.
//!
//! Every value can be overridden. [`TrackingConfig::from_json`] accepts a
//! partial document and fills the rest from the defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailSentinelError};

/// Default process-noise rate for the position filter.
pub const DEFAULT_PROCESS_NOISE: f64 = 0.001;

/// Largest accepted process-noise rate. Keeps the predicted variance finite
/// for any elapsed time an `i64` timestamp can express.
pub const MAX_PROCESS_NOISE: f64 = 1.0;

/// Distance thresholds separating the three safety tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Distances at or below this are SAFE.
    /// Default: 50.0 meters
    pub warning_threshold_meters: f64,

    /// Distances at or below this (and above the warning threshold) are WARNING,
    /// anything further is DANGER.
    /// Default: 150.0 meters
    pub danger_threshold_meters: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdPreset::Standard.thresholds()
    }
}

impl ThresholdConfig {
    pub fn new(warning_threshold_meters: f64, danger_threshold_meters: f64) -> Self {
        Self {
            warning_threshold_meters,
            danger_threshold_meters,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ok = self.warning_threshold_meters.is_finite()
            && self.danger_threshold_meters.is_finite()
            && self.warning_threshold_meters > 0.0
            && self.warning_threshold_meters < self.danger_threshold_meters;
        if !ok {
            return Err(TrailSentinelError::ConfigError {
                message: format!(
                    "thresholds must satisfy 0 < warning < danger (got {} / {})",
                    self.warning_threshold_meters, self.danger_threshold_meters
                ),
            });
        }
        Ok(())
    }
}

/// Named threshold pairs seen in deployed builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPreset {
    /// 20 m / 50 m: alerts early, suited to narrow ridge paths
    Strict,
    /// 50 m / 150 m: tolerant of GPS drift under canopy
    Standard,
}

impl ThresholdPreset {
    pub fn thresholds(&self) -> ThresholdConfig {
        match self {
            ThresholdPreset::Strict => ThresholdConfig::new(20.0, 50.0),
            ThresholdPreset::Standard => ThresholdConfig::new(50.0, 150.0),
        }
    }
}

/// Process-noise presets for [`crate::PositionFilter`].
///
/// Selecting a profile only changes the process-noise rate `Q`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseProfile {
    /// Q = 0.001
    Standard,
    /// Tight process noise: leans on smoothing, rides out multipath under canopy
    Forest,
    /// Loose process noise: follows quick direction changes on open ground
    OpenTerrain,
    /// Raw Q value
    Custom(f64),
}

impl NoiseProfile {
    pub fn process_noise(&self) -> f64 {
        match self {
            NoiseProfile::Standard => DEFAULT_PROCESS_NOISE,
            NoiseProfile::Forest => 0.0005,
            NoiseProfile::OpenTerrain => 0.002,
            NoiseProfile::Custom(q) => *q,
        }
    }
}

impl Default for NoiseProfile {
    fn default() -> Self {
        NoiseProfile::Standard
    }
}

/// Configuration for one tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub thresholds: ThresholdConfig,

    pub noise_profile: NoiseProfile,

    /// Number of raw tiers the monitor keeps.
    /// Default: 3
    pub monitor_window_size: usize,

    /// Half-width of the index query window around the smoothed point (degrees).
    /// Default: 0.002 (~220 m)
    pub query_padding_degrees: f64,

    /// Padding around each trail's own box for the engine-side reject (degrees).
    /// Default: 0.001 (~110 m)
    pub trail_bbox_padding_degrees: f64,

    /// Gap between fixes after which the filter restarts from the new fix.
    /// Default: 300000 ms (5 minutes). `None` disables.
    pub filter_reset_gap_ms: Option<i64>,

    /// Fixes buffered by the session worker before the oldest is dropped.
    /// Default: 64
    pub queue_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            noise_profile: NoiseProfile::default(),
            monitor_window_size: 3,
            query_padding_degrees: 0.002,
            trail_bbox_padding_degrees: 0.001,
            filter_reset_gap_ms: Some(300_000),
            queue_capacity: 64,
        }
    }
}

impl TrackingConfig {
    /// Default configuration with one of the named threshold pairs.
    pub fn with_preset(preset: ThresholdPreset) -> Self {
        Self {
            thresholds: preset.thresholds(),
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn process_noise(&self) -> f64 {
        self.noise_profile.process_noise()
    }

    /// Padding the engine uses for its per-trail reject.
    ///
    /// Never narrower than the query window, so every trail the index
    /// returns for this point gets an exact distance.
    pub fn effective_trail_padding(&self) -> f64 {
        self.trail_bbox_padding_degrees
            .max(self.query_padding_degrees)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        let q = self.process_noise();
        if !q.is_finite() || !(0.0..=MAX_PROCESS_NOISE).contains(&q) {
            return Err(config_error(format!(
                "process noise must be within [0, {}], got {}",
                MAX_PROCESS_NOISE, q
            )));
        }
        if self.monitor_window_size == 0 {
            return Err(config_error("monitor_window_size must be at least 1".to_string()));
        }
        for (name, value) in [
            ("query_padding_degrees", self.query_padding_degrees),
            ("trail_bbox_padding_degrees", self.trail_bbox_padding_degrees),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!("{} must be >= 0, got {}", name, value)));
            }
        }
        if let Some(gap) = self.filter_reset_gap_ms {
            if gap <= 0 {
                return Err(config_error(format!("filter_reset_gap_ms must be > 0, got {}", gap)));
            }
        }
        if self.queue_capacity == 0 {
            return Err(config_error("queue_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn config_error(message: String) -> TrailSentinelError {
    TrailSentinelError::ConfigError { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.warning_threshold_meters, 50.0);
        assert_eq!(config.thresholds.danger_threshold_meters, 150.0);
        assert_eq!(config.process_noise(), DEFAULT_PROCESS_NOISE);
        assert_eq!(config.monitor_window_size, 3);
    }

    #[test]
    fn test_presets() {
        let strict = TrackingConfig::with_preset(ThresholdPreset::Strict);
        assert_eq!(strict.thresholds, ThresholdConfig::new(20.0, 50.0));
        assert!(strict.validate().is_ok());
    }

    #[test]
    fn test_profiles_only_change_q() {
        assert!(NoiseProfile::Forest.process_noise() < NoiseProfile::Standard.process_noise());
        assert!(NoiseProfile::OpenTerrain.process_noise() > NoiseProfile::Standard.process_noise());
        assert_eq!(NoiseProfile::Custom(0.42).process_noise(), 0.42);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TrackingConfig::from_json(
            r#"{"thresholds": {"warning_threshold_meters": 20.0, "danger_threshold_meters": 50.0},
                "noise_profile": "forest"}"#,
        )
        .unwrap();
        assert_eq!(config.thresholds.warning_threshold_meters, 20.0);
        assert_eq!(config.noise_profile, NoiseProfile::Forest);
        assert_eq!(config.query_padding_degrees, 0.002);
        assert_eq!(config.queue_capacity, 64);

        let custom = TrackingConfig::from_json(r#"{"noise_profile": {"custom": 0.01}}"#).unwrap();
        assert_eq!(custom.process_noise(), 0.01);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(TrackingConfig::from_json(
            r#"{"thresholds": {"warning_threshold_meters": 150.0, "danger_threshold_meters": 50.0}}"#
        )
        .is_err());
        assert!(TrackingConfig::from_json(r#"{"monitor_window_size": 0}"#).is_err());
        assert!(TrackingConfig::from_json(r#"{"query_padding_degrees": -1.0}"#).is_err());
        assert!(TrackingConfig::from_json(r#"{"noise_profile": {"custom": -0.5}}"#).is_err());
        assert!(TrackingConfig::from_json(r#"{"noise_profile": {"custom": 1e200}}"#).is_err());
        assert!(TrackingConfig::from_json(r#"{"noise_profile": {"custom": 1.0}}"#).is_ok());
        assert!(TrackingConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_effective_padding_covers_query_window() {
        let config = TrackingConfig::default();
        assert_eq!(config.effective_trail_padding(), 0.002);

        let wide = TrackingConfig {
            trail_bbox_padding_degrees: 0.01,
            ..TrackingConfig::default()
        };
        assert_eq!(wide.effective_trail_padding(), 0.01);
    }
}
